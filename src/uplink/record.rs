//! Per-interface uplink record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::UplinkRow;
use crate::types::{AddressFamily, InterfaceType, LinkState, UnreachableKind, UplinkId};

/// Priority used when an uplink row arrives without one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultPriorities {
    #[serde(default = "default_ethernet")]
    pub ethernet: i32,
    #[serde(default = "default_vlan")]
    pub vlan: i32,
    #[serde(default = "default_pppoe")]
    pub pppoe: i32,
    #[serde(default = "default_lte")]
    pub lte: i32,
    #[serde(default = "default_wifi")]
    pub wifi_station: i32,
    #[serde(default = "default_wifi")]
    pub gre: i32,
    #[serde(default = "default_bridge_member")]
    pub bridge_member: i32,
}

fn default_ethernet() -> i32 {
    11
}

fn default_vlan() -> i32 {
    10
}

fn default_pppoe() -> i32 {
    10
}

fn default_lte() -> i32 {
    5
}

fn default_wifi() -> i32 {
    9
}

fn default_bridge_member() -> i32 {
    8
}

impl Default for DefaultPriorities {
    fn default() -> Self {
        Self {
            ethernet: default_ethernet(),
            vlan: default_vlan(),
            pppoe: default_pppoe(),
            lte: default_lte(),
            wifi_station: default_wifi(),
            gre: default_wifi(),
            bridge_member: default_bridge_member(),
        }
    }
}

impl DefaultPriorities {
    pub fn for_type(&self, if_type: InterfaceType) -> i32 {
        match if_type {
            InterfaceType::Ethernet => self.ethernet,
            InterfaceType::Vlan => self.vlan,
            InterfaceType::Pppoe => self.pppoe,
            InterfaceType::Lte => self.lte,
            InterfaceType::WifiStation => self.wifi_station,
            InterfaceType::Gre => self.gre,
            InterfaceType::BridgeMember => self.bridge_member,
        }
    }
}

/// Consecutive reachability failures reported against an uplink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReachabilityCounters {
    pub router: u32,
    pub cloud: u32,
    pub internet: u32,
}

impl ReachabilityCounters {
    pub fn get(&self, kind: UnreachableKind) -> u32 {
        match kind {
            UnreachableKind::Router => self.router,
            UnreachableKind::Cloud => self.cloud,
            UnreachableKind::Internet => self.internet,
        }
    }

    pub fn get_mut(&mut self, kind: UnreachableKind) -> &mut u32 {
        match kind {
            UnreachableKind::Router => &mut self.router,
            UnreachableKind::Cloud => &mut self.cloud,
            UnreachableKind::Internet => &mut self.internet,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.router == 0 && self.cloud == 0 && self.internet == 0
    }
}

/// In-memory view of one uplink candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UplinkRecord {
    pub id: UplinkId,
    pub if_type: InterfaceType,
    pub priority: i32,
    pub has_l2: bool,
    pub has_l3: bool,
    pub is_used: bool,
    pub ipv4: LinkState,
    pub ipv6: LinkState,
    /// Present only while a family is blocked.
    pub unblock_deadline: Option<DateTime<Utc>>,
    pub bridge: Option<String>,
    pub loop_detected: bool,
    pub counters: ReachabilityCounters,
    pub ntp_synced: bool,
}

impl UplinkRecord {
    pub fn new(id: impl Into<UplinkId>, if_type: InterfaceType, priority: i32) -> Self {
        Self {
            id: id.into(),
            if_type,
            priority,
            has_l2: false,
            has_l3: false,
            is_used: false,
            ipv4: LinkState::None,
            ipv6: LinkState::None,
            unblock_deadline: None,
            bridge: None,
            loop_detected: false,
            counters: ReachabilityCounters::default(),
            ntp_synced: false,
        }
    }

    /// Mark both layers as up.
    pub fn with_link(mut self) -> Self {
        self.has_l2 = true;
        self.has_l3 = true;
        self
    }

    pub fn with_ipv4(mut self, state: LinkState) -> Self {
        self.ipv4 = state;
        self
    }

    pub fn with_ipv6(mut self, state: LinkState) -> Self {
        self.ipv6 = state;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.unblock_deadline = Some(deadline);
        self
    }

    pub fn used(mut self) -> Self {
        self.is_used = true;
        self
    }

    /// Build a record from a store row.
    ///
    /// Returns the record and whether the priority was filled in from
    /// `defaults` (the caller writes it back).
    pub fn from_row(row: &UplinkRow, defaults: &DefaultPriorities) -> Result<(Self, bool)> {
        let if_type: InterfaceType = row.if_type.parse()?;
        let (priority, defaulted) = match row.priority {
            Some(p) => (p, false),
            None => (defaults.for_type(if_type), true),
        };
        let unblock_deadline = match row.unblock_ts.as_deref() {
            Some(ts) => parse_deadline(ts)?,
            None => None,
        };

        let record = Self {
            id: UplinkId::new(row.if_name.clone()),
            if_type,
            priority,
            has_l2: row.has_l2,
            has_l3: row.has_l3,
            is_used: row.is_used,
            ipv4: row.ipv4_state.parse()?,
            ipv6: row.ipv6_state.parse()?,
            unblock_deadline,
            bridge: row.bridge.clone().filter(|b| !b.is_empty()),
            loop_detected: row.loop_detected,
            counters: ReachabilityCounters {
                router: row.unreachable_router_counter,
                cloud: row.unreachable_cloud_counter,
                internet: row.unreachable_internet_counter,
            },
            ntp_synced: row.ntp_state,
        };
        Ok((record, defaulted))
    }

    pub fn state(&self, family: AddressFamily) -> LinkState {
        match family {
            AddressFamily::Ipv4 => self.ipv4,
            AddressFamily::Ipv6 => self.ipv6,
        }
    }

    pub fn set_state(&mut self, family: AddressFamily, state: LinkState) {
        match family {
            AddressFamily::Ipv4 => self.ipv4 = state,
            AddressFamily::Ipv6 => self.ipv6 = state,
        }
    }

    pub fn is_blocked_any(&self) -> bool {
        self.ipv4.is_blocked() || self.ipv6.is_blocked()
    }

    pub fn blocked_families(&self) -> impl Iterator<Item = AddressFamily> + '_ {
        AddressFamily::ALL
            .into_iter()
            .filter(|f| self.state(*f).is_blocked())
    }

    pub fn has_link(&self) -> bool {
        self.has_l2 && self.has_l3
    }

    /// Whether this uplink may win arbitration.
    ///
    /// Both layers must be up and at least one family must be usable, so an
    /// uplink blocked on IPv4 can still win on IPv6.
    pub fn is_candidate(&self) -> bool {
        self.has_link() && (self.ipv4.is_usable() || self.ipv6.is_usable())
    }
}

/// Parse an unblock deadline: unix seconds or RFC 3339. Empty means none.
pub fn parse_deadline(ts: &str) -> Result<Option<DateTime<Utc>>> {
    let ts = ts.trim();
    if ts.is_empty() {
        return Ok(None);
    }
    if let Ok(secs) = ts.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0)
            .map(Some)
            .ok_or_else(|| Error::InvalidInput(format!("deadline out of range: {ts}")));
    }
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| Some(dt.with_timezone(&Utc)))
        .map_err(|e| Error::InvalidInput(format!("bad deadline {ts}: {e}")))
}
