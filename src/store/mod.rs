//! External link store seam.
//!
//! The engine reads typed rows from a publish/subscribe table store and
//! writes idempotent partial updates back. Everything that talks to the
//! store, the onboarding notifier or the manager supervisor goes through the
//! traits in this module.

mod memory;

pub use memory::{MemoryStore, StoreWrite};

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{IpAssignScheme, LinkState, UnreachableKind, UplinkId};

/// Kind of change carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Modify,
    Delete,
}

/// One row change: the full new row plus the names of columns that changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowChange<T> {
    pub kind: ChangeKind,
    pub row: T,
    #[serde(default)]
    pub changed: BTreeSet<String>,
}

impl<T> RowChange<T> {
    pub fn insert(row: T) -> Self {
        Self {
            kind: ChangeKind::Insert,
            row,
            changed: BTreeSet::new(),
        }
    }

    pub fn modify<I, S>(row: T, changed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: ChangeKind::Modify,
            row,
            changed: changed.into_iter().map(Into::into).collect(),
        }
    }

    pub fn delete(row: T) -> Self {
        Self {
            kind: ChangeKind::Delete,
            row,
            changed: BTreeSet::new(),
        }
    }

    /// Whether `column` is new in this notification.
    ///
    /// Inserts report every column as changed; a modify with an empty
    /// changed set is treated the same way.
    pub fn is_changed(&self, column: &str) -> bool {
        match self.kind {
            ChangeKind::Insert => true,
            ChangeKind::Delete => false,
            ChangeKind::Modify => self.changed.is_empty() || self.changed.contains(column),
        }
    }
}

/// Uplink candidate row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UplinkRow {
    pub if_name: String,
    pub if_type: String,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(rename = "has_L2", default)]
    pub has_l2: bool,
    #[serde(rename = "has_L3", default)]
    pub has_l3: bool,
    #[serde(default)]
    pub is_used: bool,
    #[serde(rename = "ipv4", default)]
    pub ipv4_state: String,
    #[serde(rename = "ipv6", default)]
    pub ipv6_state: String,
    /// Unix seconds or RFC 3339.
    #[serde(default)]
    pub unblock_ts: Option<String>,
    #[serde(default)]
    pub bridge: Option<String>,
    #[serde(rename = "loop", default)]
    pub loop_detected: bool,
    #[serde(default)]
    pub unreachable_router_counter: u32,
    #[serde(default)]
    pub unreachable_cloud_counter: u32,
    #[serde(default)]
    pub unreachable_internet_counter: u32,
    #[serde(default)]
    pub ntp_state: bool,
}

/// Lower-layer state of one interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceRow {
    pub if_name: String,
    #[serde(default)]
    pub if_type: Option<String>,
    #[serde(default)]
    pub port_state: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub network: bool,
    #[serde(default)]
    pub inet_addr: Option<String>,
    #[serde(default)]
    pub netmask: Option<String>,
    #[serde(default)]
    pub ip_assign_scheme: Option<String>,
    #[serde(default)]
    pub inet6_addr: Option<String>,
    #[serde(default)]
    pub ipv6_assign_scheme: Option<String>,
    /// Raw vendor DHCP option data, base64.
    #[serde(default)]
    pub dhcpc_vendor_option: Option<String>,
}

fn default_true() -> bool {
    true
}

impl InterfaceRow {
    pub fn new(if_name: impl Into<String>) -> Self {
        Self {
            if_name: if_name.into(),
            if_type: None,
            port_state: None,
            enabled: true,
            network: true,
            inet_addr: None,
            netmask: None,
            ip_assign_scheme: None,
            inet6_addr: None,
            ipv6_assign_scheme: None,
            dhcpc_vendor_option: None,
        }
    }

    pub fn is_port_inactive(&self) -> bool {
        self.port_state.as_deref() == Some("inactive")
    }
}

/// Bridge and its member ports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeRow {
    pub name: String,
    #[serde(default)]
    pub ports: Vec<String>,
}

/// Cloud connectivity of the device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceRow {
    #[serde(default)]
    pub is_connected: bool,
    #[serde(default)]
    pub manager_addr: Option<String>,
    #[serde(default)]
    pub redirector_addr: Option<String>,
}

/// Inbound notification from the store or a reachability probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum StoreEvent {
    Uplink(RowChange<UplinkRow>),
    Interface(RowChange<InterfaceRow>),
    Bridge(RowChange<BridgeRow>),
    Device(RowChange<DeviceRow>),
    Reachability {
        if_name: String,
        kind: UnreachableKind,
    },
}

impl StoreEvent {
    /// Parse one JSON-lines record.
    pub fn from_json_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

/// Partial update to an uplink row. `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UplinkUpdate {
    pub ipv4: Option<LinkState>,
    pub ipv6: Option<LinkState>,
    /// `Some(None)` clears the deadline.
    pub unblock_ts: Option<Option<DateTime<Utc>>>,
    pub priority: Option<i32>,
    pub bridge: Option<Option<String>>,
    pub is_used: Option<bool>,
    pub has_l3: Option<bool>,
    pub loop_detected: Option<bool>,
    /// Zero all three unreachable counters.
    pub clear_counters: bool,
}

impl UplinkUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_used(mut self, used: bool) -> Self {
        self.is_used = Some(used);
        self
    }

    pub fn unblock_ts(mut self, ts: Option<DateTime<Utc>>) -> Self {
        self.unblock_ts = Some(ts);
        self
    }

    pub fn ipv4(mut self, state: LinkState) -> Self {
        self.ipv4 = Some(state);
        self
    }

    pub fn ipv6(mut self, state: LinkState) -> Self {
        self.ipv6 = Some(state);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn bridge(mut self, bridge: Option<String>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn has_l3(mut self, has_l3: bool) -> Self {
        self.has_l3 = Some(has_l3);
        self
    }

    pub fn loop_detected(mut self, detected: bool) -> Self {
        self.loop_detected = Some(detected);
        self
    }

    pub fn clear_counters(mut self) -> Self {
        self.clear_counters = true;
        self
    }
}

/// Partial update to an interface config row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceUpdate {
    pub enabled: Option<bool>,
    pub network: Option<bool>,
    pub ip_assign_scheme: Option<IpAssignScheme>,
    pub ipv6_assign_scheme: Option<IpAssignScheme>,
    /// `Some(None)` removes the tag.
    pub vlan_tag: Option<Option<u16>>,
}

/// GRE tunnel over a WiFi station uplink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GreTunnel {
    pub if_name: String,
    pub parent: String,
    pub local_addr: Ipv4Addr,
    pub remote_addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub mtu: u32,
    pub enabled: bool,
    pub network: bool,
}

/// Status pushed to the onboarding channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum OnboardingStatus {
    Unreachable { uplink: UplinkId, kind: UnreachableKind },
}

/// Writes toward the shared table store.
///
/// Every method is an idempotent upsert or targeted field update.
pub trait LinkStore: Send + Sync {
    fn update_uplink(&self, if_name: &str, update: &UplinkUpdate) -> Result<()>;

    fn update_interface(&self, if_name: &str, update: &InterfaceUpdate) -> Result<()>;

    fn upsert_gre(&self, tunnel: &GreTunnel) -> Result<()>;

    fn delete_gre(&self, if_name: &str) -> Result<()>;

    fn remove_bridge_port(&self, bridge: &str, port: &str) -> Result<()>;

    fn reset_dhcpv6(&self, if_name: &str) -> Result<()>;

    fn cancel_dhcp_dryrun(&self, if_name: &str) -> Result<()>;
}

/// Best-effort onboarding status channel.
pub trait OnboardingNotifier: Send + Sync {
    fn signal(&self, status: &OnboardingStatus) -> Result<()>;
}

/// Supervisor of the sibling managers.
pub trait ManagerControl: Send + Sync {
    fn restart_managers(&self, reason: &str) -> Result<()>;
}

/// Everything the engine talks to outside itself.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn LinkStore>,
    pub notifier: Arc<dyn OnboardingNotifier>,
    pub managers: Arc<dyn ManagerControl>,
}

impl Collaborators {
    pub fn new(
        store: Arc<dyn LinkStore>,
        notifier: Arc<dyn OnboardingNotifier>,
        managers: Arc<dyn ManagerControl>,
    ) -> Self {
        Self {
            store,
            notifier,
            managers,
        }
    }

    /// Route all three seams into one in-memory store.
    pub fn memory(store: &Arc<MemoryStore>) -> Self {
        Self {
            store: store.clone(),
            notifier: store.clone(),
            managers: store.clone(),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
