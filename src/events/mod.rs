//! Uplink outage event log.
//!
//! Records connectivity transitions of the used uplink as a bounded list of
//! timestamped events, optionally persisted as JSON so outages that span a
//! restart are still visible afterwards.
//!
//! Only one outage is tracked at a time: while any kind is disconnected,
//! further disconnects are ignored, since they are usually side effects of
//! the reconfiguration the first outage triggered.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::UnreachableKind;

/// Event log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogConfig {
    /// Maximum events kept; the oldest is dropped first.
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Where to persist the log. Memory only when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_max_events() -> usize {
    32
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            path: None,
        }
    }
}

/// What went up or down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// An uplink is selected at all
    Link,
    Router,
    Cloud,
    Internet,
    Ntp,
}

impl From<UnreachableKind> for EventKind {
    fn from(kind: UnreachableKind) -> Self {
        match kind {
            UnreachableKind::Router => Self::Router,
            UnreachableKind::Cloud => Self::Cloud,
            UnreachableKind::Internet => Self::Internet,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link => write!(f, "link"),
            Self::Router => write!(f, "router"),
            Self::Cloud => write!(f, "cloud"),
            Self::Internet => write!(f, "internet"),
            Self::Ntp => write!(f, "ntp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UplinkEvent {
    /// Unix seconds.
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub connected: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Persisted {
    #[serde(default)]
    counter: u64,
    #[serde(default)]
    events: Vec<UplinkEvent>,
}

/// Bounded outage log.
#[derive(Debug)]
pub struct UplinkEventLog {
    config: EventLogConfig,
    events: VecDeque<UplinkEvent>,
    /// Events ever recorded, including dropped ones.
    counter: u64,
    /// Last known state per kind. Kinds never seen count as connected.
    current: HashMap<EventKind, (bool, i64)>,
}

impl UplinkEventLog {
    pub fn new(config: EventLogConfig) -> Self {
        Self {
            config,
            events: VecDeque::new(),
            counter: 0,
            current: HashMap::new(),
        }
    }

    /// Create a log, restoring persisted events when the file exists.
    pub fn load(config: EventLogConfig) -> Result<Self> {
        let mut log = Self::new(config);
        let Some(path) = log.config.path.clone() else {
            return Ok(log);
        };
        if !path.exists() {
            return Ok(log);
        }

        let content = std::fs::read_to_string(&path)?;
        let persisted: Persisted = serde_json::from_str(&content)?;
        log.counter = persisted.counter;
        for event in persisted.events {
            let latest = log.current.get(&event.kind).map_or(i64::MIN, |(_, ts)| *ts);
            if latest < event.timestamp {
                // An outage still open at shutdown stays open.
                log.current.insert(event.kind, (event.connected, event.timestamp));
            }
            log.events.push_back(event);
        }
        while log.events.len() > log.config.max_events {
            log.events.pop_front();
        }

        tracing::debug!(path = %path.display(), events = log.events.len(), "Uplink events loaded");
        Ok(log)
    }

    /// Record a state change. Returns whether an event was appended.
    pub fn add_event(&mut self, timestamp: i64, connected: bool, kind: EventKind) -> bool {
        if !connected {
            if let Some(active) = self.active_outage() {
                tracing::debug!(%active, %kind, "Outage already active, not logging");
                return false;
            }
        }

        let (was_connected, last_ts) = self.current.get(&kind).copied().unwrap_or((true, i64::MIN));
        if was_connected == connected || last_ts >= timestamp {
            return false;
        }
        self.current.insert(kind, (connected, timestamp));

        tracing::info!(
            %kind,
            state = if connected { "connected" } else { "disconnected" },
            timestamp,
            "Uplink event"
        );

        if self.events.len() >= self.config.max_events.max(1) {
            tracing::warn!("Maximum number of uplink events reached, discarding oldest entry");
            self.events.pop_front();
        }
        self.events.push_back(UplinkEvent {
            timestamp,
            kind,
            connected,
        });
        self.counter += 1;
        true
    }

    /// Drop the event recorded at `timestamp`, as when a consumer acknowledges it.
    pub fn remove_event(&mut self, timestamp: i64) -> bool {
        match self.events.iter().position(|e| e.timestamp == timestamp) {
            Some(idx) => {
                self.events.remove(idx);
                true
            }
            None => {
                tracing::warn!(timestamp, "No uplink event with this timestamp");
                false
            }
        }
    }

    /// Kind of the outage currently open, if any.
    pub fn active_outage(&self) -> Option<EventKind> {
        [
            EventKind::Link,
            EventKind::Router,
            EventKind::Cloud,
            EventKind::Internet,
            EventKind::Ntp,
        ]
        .into_iter()
        .find(|k| self.current.get(k).is_some_and(|(connected, _)| !connected))
    }

    pub fn events(&self) -> impl Iterator<Item = &UplinkEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn path(&self) -> Option<&Path> {
        self.config.path.as_deref()
    }

    /// Write the log to its configured path. No-op without one.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = self.config.path.as_deref() else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let persisted = Persisted {
            counter: self.counter,
            events: self.events.iter().copied().collect(),
        };
        let content = serde_json::to_string(&persisted)?;
        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write uplink events: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> UplinkEventLog {
        UplinkEventLog::new(EventLogConfig::default())
    }

    #[test]
    fn test_records_only_changes() {
        let mut log = log();
        assert!(!log.add_event(100, true, EventKind::Router));
        assert!(log.add_event(101, false, EventKind::Router));
        assert!(!log.add_event(102, false, EventKind::Router));
        assert!(log.add_event(103, true, EventKind::Router));
        assert_eq!(log.len(), 2);
        assert_eq!(log.active_outage(), None);
    }

    #[test]
    fn test_older_timestamp_ignored() {
        let mut log = log();
        assert!(log.add_event(200, false, EventKind::Link));
        assert!(!log.add_event(150, true, EventKind::Link));
        assert_eq!(log.active_outage(), Some(EventKind::Link));
    }

    #[test]
    fn test_single_active_outage() {
        let mut log = log();
        assert!(log.add_event(10, false, EventKind::Internet));
        assert!(!log.add_event(11, false, EventKind::Router));
        assert!(log.add_event(12, true, EventKind::Internet));
        assert!(log.add_event(13, false, EventKind::Router));
        assert_eq!(log.active_outage(), Some(EventKind::Router));
    }

    #[test]
    fn test_bounded() {
        let mut log = UplinkEventLog::new(EventLogConfig {
            max_events: 4,
            path: None,
        });
        for i in 0..5 {
            log.add_event(i * 2, false, EventKind::Link);
            log.add_event(i * 2 + 1, true, EventKind::Link);
        }
        assert_eq!(log.len(), 4);
        assert_eq!(log.counter(), 10);
        assert_eq!(log.events().next().map(|e| e.timestamp), Some(6));
    }

    #[test]
    fn test_remove_event() {
        let mut log = log();
        log.add_event(5, false, EventKind::Ntp);
        assert!(log.remove_event(5));
        assert!(!log.remove_event(5));
        assert!(log.is_empty());
    }

    #[test]
    fn test_persist_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = EventLogConfig {
            max_events: 8,
            path: Some(dir.path().join("state").join("uplink_events.json")),
        };

        let mut log = UplinkEventLog::new(config.clone());
        log.add_event(50, false, EventKind::Router);
        log.persist().unwrap();

        let restored = UplinkEventLog::load(config).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.counter(), 1);
        assert_eq!(restored.active_outage(), Some(EventKind::Router));
    }
}
