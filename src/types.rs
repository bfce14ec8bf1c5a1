//! Core types used throughout gatelink.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Unique identifier for an uplink (the interface name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UplinkId(pub String);

impl UplinkId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UplinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UplinkId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UplinkId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for UplinkId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Network interface type of an uplink candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceType {
    /// Wired Ethernet port
    #[serde(alias = "eth")]
    Ethernet,
    /// WiFi station (client) link to an upstream gateway
    #[serde(alias = "vif")]
    WifiStation,
    /// GRE tunnel over a WiFi station link
    Gre,
    /// Cellular modem
    Lte,
    /// PPPoE session over a wired port
    Pppoe,
    /// VLAN sub-interface
    Vlan,
    /// Port already enslaved to a bridge
    #[serde(alias = "bridge")]
    BridgeMember,
}

impl InterfaceType {
    /// Whether this uplink rides over a wireless backhaul.
    pub fn is_wireless(self) -> bool {
        matches!(self, Self::WifiStation | Self::Gre)
    }

    pub fn is_ethernet(self) -> bool {
        matches!(self, Self::Ethernet)
    }

    /// Key used for per-type tables in configuration.
    pub fn config_key(self) -> &'static str {
        match self {
            Self::Ethernet => "ethernet",
            Self::WifiStation => "wifi_station",
            Self::Gre => "gre",
            Self::Lte => "lte",
            Self::Pppoe => "pppoe",
            Self::Vlan => "vlan",
            Self::BridgeMember => "bridge_member",
        }
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ethernet => write!(f, "eth"),
            Self::WifiStation => write!(f, "vif"),
            Self::Gre => write!(f, "gre"),
            Self::Lte => write!(f, "lte"),
            Self::Pppoe => write!(f, "pppoe"),
            Self::Vlan => write!(f, "vlan"),
            Self::BridgeMember => write!(f, "bridge"),
        }
    }
}

impl FromStr for InterfaceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eth" | "ethernet" => Ok(Self::Ethernet),
            "vif" | "wifi_station" => Ok(Self::WifiStation),
            "gre" => Ok(Self::Gre),
            "lte" => Ok(Self::Lte),
            "pppoe" => Ok(Self::Pppoe),
            "vlan" => Ok(Self::Vlan),
            "bridge" | "bridge_member" => Ok(Self::BridgeMember),
            other => Err(Error::InvalidInput(format!("unknown interface type: {other}"))),
        }
    }
}

/// Per address family link state, as stored in the uplink row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// No IP assignment yet
    #[default]
    None,
    /// Addressed and ready to carry traffic
    Ready,
    /// Addressed but administratively idle
    Inactive,
    /// Carrying traffic
    Active,
    /// Quarantined until its unblock deadline
    Blocked,
    /// One-shot retry state after the deadline expired
    Unblocking,
}

impl LinkState {
    /// States in which the family can carry traffic.
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Ready | Self::Active | Self::Unblocking)
    }

    pub fn is_blocked(self) -> bool {
        matches!(self, Self::Blocked)
    }

    /// Blocked, or freshly released from a block.
    pub fn is_quarantined(self) -> bool {
        matches!(self, Self::Blocked | Self::Unblocking)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Ready => "ready",
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Blocked => "blocked",
            Self::Unblocking => "unblocking",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(Self::None),
            "ready" => Ok(Self::Ready),
            "inactive" => Ok(Self::Inactive),
            "active" => Ok(Self::Active),
            "blocked" => Ok(Self::Blocked),
            "unblocking" => Ok(Self::Unblocking),
            other => Err(Error::InvalidInput(format!("unknown link state: {other}"))),
        }
    }
}

/// IP address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    pub const ALL: [Self; 2] = [Self::Ipv4, Self::Ipv6];
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4 => write!(f, "ipv4"),
            Self::Ipv6 => write!(f, "ipv6"),
        }
    }
}

/// Role of the device in the local network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    /// Gateway for the local network
    #[default]
    Router,
    /// Downstream extension of another gateway
    BridgeMember,
}

impl DeviceRole {
    /// Role implied by the type of the winning uplink.
    pub fn for_uplink(if_type: InterfaceType) -> Self {
        if if_type.is_wireless() {
            Self::BridgeMember
        } else {
            Self::Router
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Router => write!(f, "router"),
            Self::BridgeMember => write!(f, "bridge_member"),
        }
    }
}

/// Kind of reachability failure reported against an uplink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnreachableKind {
    Router,
    Cloud,
    Internet,
}

impl fmt::Display for UnreachableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Router => write!(f, "router"),
            Self::Cloud => write!(f, "cloud"),
            Self::Internet => write!(f, "internet"),
        }
    }
}

/// Address assignment scheme of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpAssignScheme {
    Static,
    Dhcp,
    /// Anything else, including no assignment at all
    #[default]
    None,
}

impl IpAssignScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Dhcp => "dhcp",
            Self::None => "none",
        }
    }
}

impl fmt::Display for IpAssignScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for IpAssignScheme {
    fn from(s: &str) -> Self {
        match s {
            "static" => Self::Static,
            "dhcp" => Self::Dhcp,
            _ => Self::None,
        }
    }
}
