//! GRE tunnel derivation for WiFi station uplinks.

use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::store::{GreTunnel, InterfaceRow};

/// Tunnel interface name for a station.
pub fn tunnel_name(prefix: &str, station: &str) -> String {
    format!("{prefix}{station}")
}

/// Gateway of the station's subnet: network address with host bit 1 set.
pub fn gateway_for(addr: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from((u32::from(addr) & u32::from(netmask)) | 1)
}

fn parse_v4(value: Option<&str>, what: &str, station: &str) -> Result<Ipv4Addr> {
    let raw = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::InvalidInput(format!("{station}: missing {what}")))?;
    let addr: Ipv4Addr = raw
        .parse()
        .map_err(|e| Error::InvalidInput(format!("{station}: bad {what} {raw}: {e}")))?;
    if addr.is_unspecified() {
        return Err(Error::InvalidInput(format!("{station}: {what} is unset")));
    }
    Ok(addr)
}

/// Build the tunnel for a station from its interface row.
///
/// The station's own address is the local end; the remote end is the
/// gateway of its subnet. Enabled and network flags mirror the station.
pub fn derive_tunnel(station: &InterfaceRow, prefix: &str, mtu: u32) -> Result<GreTunnel> {
    let local = parse_v4(station.inet_addr.as_deref(), "address", &station.if_name)?;
    let netmask = parse_v4(station.netmask.as_deref(), "netmask", &station.if_name)?;

    Ok(GreTunnel {
        if_name: tunnel_name(prefix, &station.if_name),
        parent: station.if_name.clone(),
        local_addr: local,
        remote_addr: gateway_for(local, netmask),
        netmask,
        mtu,
        enabled: station.enabled,
        network: station.network,
    })
}
