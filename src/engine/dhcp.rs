//! DHCP client synchronization for the winning uplink.

use std::net::IpAddr;

use crate::store::InterfaceRow;
use crate::types::{AddressFamily, IpAssignScheme};

/// What to do with the DHCP client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpAction {
    /// Leave the client alone.
    Keep,
    /// Start the client.
    EnableClient,
    /// Stop the client so the lease is renewed on restart.
    DisableClient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhcpDecision {
    pub action: DhcpAction,
    /// The current address is good enough to stay on.
    pub keep_current: bool,
}

impl DhcpDecision {
    const fn new(action: DhcpAction, keep_current: bool) -> Self {
        Self {
            action,
            keep_current,
        }
    }
}

/// Address configuration of one family on one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpConfig {
    pub scheme: IpAssignScheme,
    pub address: Option<String>,
}

impl IpConfig {
    pub fn new(scheme: IpAssignScheme, address: Option<&str>) -> Self {
        Self {
            scheme,
            address: address.map(str::to_string),
        }
    }

    pub fn from_row(row: &InterfaceRow, family: AddressFamily) -> Self {
        let (scheme, address) = match family {
            AddressFamily::Ipv4 => (&row.ip_assign_scheme, &row.inet_addr),
            AddressFamily::Ipv6 => (&row.ipv6_assign_scheme, &row.inet6_addr),
        };
        Self {
            scheme: scheme.as_deref().map_or(IpAssignScheme::None, IpAssignScheme::from),
            address: address.clone(),
        }
    }
}

/// Address is present, non-empty, and not the unspecified address.
pub fn is_usable_address(address: Option<&str>) -> bool {
    let Some(address) = address.map(str::trim).filter(|a| !a.is_empty()) else {
        return false;
    };
    // Strip a prefix length if present.
    let host = address.split('/').next().unwrap_or(address);
    match host.parse::<IpAddr>() {
        Ok(ip) => !ip.is_unspecified(),
        Err(_) => true,
    }
}

/// Decide the DHCP client action for one address family.
///
/// Rows are evaluated in order and the first match wins.
pub fn sync_dhcp(config: &IpConfig, refresh: bool) -> DhcpDecision {
    let usable = is_usable_address(config.address.as_deref());

    match (config.scheme, usable, refresh) {
        (IpAssignScheme::Static, true, _) => DhcpDecision::new(DhcpAction::Keep, true),
        (IpAssignScheme::Static, false, _) => DhcpDecision::new(DhcpAction::Keep, false),
        (IpAssignScheme::Dhcp, true, false) => DhcpDecision::new(DhcpAction::Keep, true),
        (IpAssignScheme::Dhcp, true, true) => DhcpDecision::new(DhcpAction::DisableClient, false),
        (IpAssignScheme::Dhcp, false, true) => DhcpDecision::new(DhcpAction::Keep, false),
        (IpAssignScheme::Dhcp, false, false) => DhcpDecision::new(DhcpAction::EnableClient, false),
        (IpAssignScheme::None, _, _) => DhcpDecision::new(DhcpAction::EnableClient, false),
    }
}
