//! In-process store that records every write.
//!
//! Used for dry runs from the command line and as the store double in tests.

use std::collections::BTreeSet;

use parking_lot::Mutex;
use serde::Serialize;

use super::{
    GreTunnel, InterfaceUpdate, LinkStore, ManagerControl, OnboardingNotifier, OnboardingStatus,
    UplinkUpdate,
};
use crate::error::{Error, Result};

/// One recorded write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreWrite {
    Uplink { if_name: String, update: UplinkUpdate },
    Interface { if_name: String, update: InterfaceUpdate },
    UpsertGre { tunnel: GreTunnel },
    DeleteGre { if_name: String },
    RemovePort { bridge: String, port: String },
    ResetDhcpv6 { if_name: String },
    CancelDhcpDryrun { if_name: String },
    RestartManagers { reason: String },
    Signal { status: OnboardingStatus },
}

impl StoreWrite {
    /// Interface (or bridge) the write targets.
    pub fn target(&self) -> &str {
        match self {
            Self::Uplink { if_name, .. }
            | Self::Interface { if_name, .. }
            | Self::DeleteGre { if_name }
            | Self::ResetDhcpv6 { if_name }
            | Self::CancelDhcpDryrun { if_name } => if_name,
            Self::UpsertGre { tunnel } => &tunnel.if_name,
            Self::RemovePort { port, .. } => port,
            Self::RestartManagers { .. } | Self::Signal { .. } => "",
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    writes: Vec<StoreWrite>,
    rejected: BTreeSet<String>,
    notifier_down: bool,
}

/// Recording store. Writes aimed at a rejected target fail with
/// [`Error::WriteRejected`] and are not recorded.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every subsequent write aimed at `target`.
    pub fn reject_writes_for(&self, target: impl Into<String>) {
        self.inner.lock().rejected.insert(target.into());
    }

    pub fn accept_writes_for(&self, target: &str) {
        self.inner.lock().rejected.remove(target);
    }

    /// Make the onboarding notifier fail.
    pub fn set_notifier_down(&self, down: bool) {
        self.inner.lock().notifier_down = down;
    }

    pub fn writes(&self) -> Vec<StoreWrite> {
        self.inner.lock().writes.clone()
    }

    pub fn take_writes(&self) -> Vec<StoreWrite> {
        std::mem::take(&mut self.inner.lock().writes)
    }

    /// Uplink updates recorded for one interface, in order.
    pub fn uplink_updates(&self, if_name: &str) -> Vec<UplinkUpdate> {
        self.inner
            .lock()
            .writes
            .iter()
            .filter_map(|w| match w {
                StoreWrite::Uplink { if_name: n, update } if n == if_name => Some(update.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn restart_count(&self) -> usize {
        self.count(|w| matches!(w, StoreWrite::RestartManagers { .. }))
    }

    pub fn signals(&self) -> Vec<OnboardingStatus> {
        self.inner
            .lock()
            .writes
            .iter()
            .filter_map(|w| match w {
                StoreWrite::Signal { status } => Some(status.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&StoreWrite) -> bool) -> usize {
        self.inner.lock().writes.iter().filter(|w| pred(w)).count()
    }

    fn record(&self, write: StoreWrite) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.rejected.contains(write.target()) {
            return Err(Error::rejected(write.target(), "target rejected by store"));
        }
        inner.writes.push(write);
        Ok(())
    }
}

impl LinkStore for MemoryStore {
    fn update_uplink(&self, if_name: &str, update: &UplinkUpdate) -> Result<()> {
        self.record(StoreWrite::Uplink {
            if_name: if_name.to_string(),
            update: update.clone(),
        })
    }

    fn update_interface(&self, if_name: &str, update: &InterfaceUpdate) -> Result<()> {
        self.record(StoreWrite::Interface {
            if_name: if_name.to_string(),
            update: update.clone(),
        })
    }

    fn upsert_gre(&self, tunnel: &GreTunnel) -> Result<()> {
        self.record(StoreWrite::UpsertGre {
            tunnel: tunnel.clone(),
        })
    }

    fn delete_gre(&self, if_name: &str) -> Result<()> {
        self.record(StoreWrite::DeleteGre {
            if_name: if_name.to_string(),
        })
    }

    fn remove_bridge_port(&self, bridge: &str, port: &str) -> Result<()> {
        self.record(StoreWrite::RemovePort {
            bridge: bridge.to_string(),
            port: port.to_string(),
        })
    }

    fn reset_dhcpv6(&self, if_name: &str) -> Result<()> {
        self.record(StoreWrite::ResetDhcpv6 {
            if_name: if_name.to_string(),
        })
    }

    fn cancel_dhcp_dryrun(&self, if_name: &str) -> Result<()> {
        self.record(StoreWrite::CancelDhcpDryrun {
            if_name: if_name.to_string(),
        })
    }
}

impl OnboardingNotifier for MemoryStore {
    fn signal(&self, status: &OnboardingStatus) -> Result<()> {
        if self.inner.lock().notifier_down {
            return Err(Error::Internal("onboarding channel unavailable".into()));
        }
        self.record(StoreWrite::Signal {
            status: status.clone(),
        })
    }
}

impl ManagerControl for MemoryStore {
    fn restart_managers(&self, reason: &str) -> Result<()> {
        self.record(StoreWrite::RestartManagers {
            reason: reason.to_string(),
        })
    }
}
