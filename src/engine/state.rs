//! Link state owned by the engine.

use serde::Serialize;

use crate::types::{DeviceRole, UplinkId};
use crate::uplink::UplinkRecord;

/// Lifecycle of a VLAN tag learned from vendor DHCP options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VtagStatus {
    #[default]
    NotUsed,
    /// Applied on the uplink, waiting for the cloud to confirm it works
    Pending,
    /// Confirmed by a cloud connection
    Applied,
}

/// VLAN tag bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VtagState {
    pub status: VtagStatus,
    pub tag: Option<u16>,
    /// Uplink the tag was applied on.
    pub uplink: Option<UplinkId>,
    /// Failures observed while pending.
    pub failures: u32,
    /// Tags rolled back after failing; never re-applied.
    pub rejected: Vec<u16>,
}

/// Singleton link state, mutated only from the engine loop.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GlobalLinkState {
    pub current_uplink: Option<UplinkId>,
    pub current_priority: Option<i32>,
    pub current_bridge: Option<String>,
    pub device_role: DeviceRole,
    /// Previous winner, kept across a switch into the router role.
    pub previous_uplink_snapshot: Option<UplinkRecord>,
    pub cloud_connected: bool,
    pub vtag: VtagState,
    /// Number of role switches since start.
    pub role_transitions: u64,
    /// Role switch that already issued a manager restart.
    pub last_restart_transition: Option<u64>,
}

impl GlobalLinkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_current(&self, name: &str) -> bool {
        self.current_uplink.as_ref().is_some_and(|id| id.as_str() == name)
    }
}
