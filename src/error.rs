//! Error types for gatelink.

use std::fmt;
use std::io;

use thiserror::Error;

/// Result type alias for gatelink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for gatelink.
#[derive(Error, Debug)]
pub enum Error {
    // Store errors
    #[error("{kind} {name} not found")]
    LookupMiss { kind: RecordKind, name: String },

    #[error("write to {target} rejected: {reason}")]
    WriteRejected { target: String, reason: String },

    // Input errors
    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // Runtime errors
    #[error("engine stopped")]
    EngineStopped,

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // General errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Kind of record a lookup was aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Uplink,
    Interface,
    Bridge,
    Port,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uplink => write!(f, "uplink"),
            Self::Interface => write!(f, "interface"),
            Self::Bridge => write!(f, "bridge"),
            Self::Port => write!(f, "port"),
        }
    }
}

impl Error {
    pub fn uplink_missing(name: impl Into<String>) -> Self {
        Self::LookupMiss {
            kind: RecordKind::Uplink,
            name: name.into(),
        }
    }

    pub fn rejected(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WriteRejected {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Check if the error is handled by skipping the current step.
    ///
    /// Recoverable errors are logged and the next recalculation retries
    /// whatever the failed step was trying to converge.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::LookupMiss { .. } | Error::WriteRejected { .. } | Error::InvalidInput(_)
        )
    }

    /// Check if the error means the engine loop is gone.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::EngineStopped | Error::Internal(_))
    }
}
