//! Role and bridge transitions on a change of winner.

use std::collections::{BTreeMap, HashMap};

use super::gre;
use super::state::GlobalLinkState;
use super::EngineConfig;
use crate::store::{GreTunnel, InterfaceRow, LinkStore, ManagerControl, UplinkUpdate};
use crate::types::{DeviceRole, InterfaceType, UplinkId};
use crate::uplink::{UplinkRecord, UplinkRegistry};

/// Everything a transition reads or writes.
pub struct TransitionContext<'a> {
    pub registry: &'a mut UplinkRegistry,
    pub state: &'a mut GlobalLinkState,
    pub store: &'a dyn LinkStore,
    pub managers: &'a dyn ManagerControl,
    pub interfaces: &'a HashMap<String, InterfaceRow>,
    /// Last GRE tunnel the store accepted, per station.
    pub tunnels: &'a mut BTreeMap<UplinkId, GreTunnel>,
    pub config: &'a EngineConfig,
}

/// What a transition did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub previous: Option<UplinkId>,
    pub current: Option<UplinkId>,
    pub role_change: Option<(DeviceRole, DeviceRole)>,
    pub managers_restarted: bool,
    pub tunnel: Option<GreTunnel>,
}

/// Move the used flag, role and bridge state from the current winner to `next`.
///
/// Every store write is fire-and-log; the next pass re-derives whatever a
/// failed write left behind.
pub fn apply(ctx: &mut TransitionContext<'_>, next: Option<&UplinkId>) -> TransitionOutcome {
    let previous = ctx.state.current_uplink.clone();
    let previous_record = previous
        .as_ref()
        .and_then(|id| ctx.registry.get(id.as_str()))
        .cloned();
    let next_record = next.and_then(|id| ctx.registry.get(id.as_str())).cloned();

    let from_role = ctx.state.device_role;
    let to_role = next_record
        .as_ref()
        .map_or(from_role, |r| DeviceRole::for_uplink(r.if_type));
    let role_switch = from_role != to_role;

    let mut outcome = TransitionOutcome {
        previous: previous.clone(),
        current: next.cloned(),
        ..Default::default()
    };

    release_others(ctx, next);

    if let Some(prev) = previous_record.filter(|p| Some(&p.id) != next) {
        leave_bridge(ctx, &prev);
        if role_switch && to_role == DeviceRole::Router {
            ctx.state.previous_uplink_snapshot = Some(prev);
        }
    }
    if role_switch && to_role == DeviceRole::BridgeMember {
        ctx.state.previous_uplink_snapshot = None;
    }

    match &next_record {
        Some(record) => {
            if let Some(r) = ctx.registry.get_mut(record.id.as_str()) {
                r.is_used = true;
            }
            write(ctx.store, &record.id, &UplinkUpdate::new().is_used(true));
            ctx.state.current_priority = Some(record.priority);
            ctx.state.current_bridge = record.bridge.clone();
        }
        None => {
            ctx.state.current_priority = None;
            ctx.state.current_bridge = None;
        }
    }
    ctx.state.current_uplink = next.cloned();

    tracing::info!(
        previous = ?previous.as_ref().map(UplinkId::as_str),
        current = ?next.map(UplinkId::as_str),
        "Uplink changed"
    );

    if role_switch {
        ctx.state.role_transitions += 1;
        ctx.state.device_role = to_role;
        outcome.role_change = Some((from_role, to_role));
        tracing::info!(from = %from_role, to = %to_role, "Device role changed");

        if from_role == DeviceRole::BridgeMember && to_role == DeviceRole::Router {
            outcome.managers_restarted = restart_once(ctx);
        }
    }

    if let Some(record) = next_record.filter(|r| r.if_type == InterfaceType::WifiStation) {
        outcome.tunnel = ensure_tunnel(ctx, &record);
    }

    outcome
}

/// Clear the used flag everywhere except on `keep`.
fn release_others(ctx: &mut TransitionContext<'_>, keep: Option<&UplinkId>) {
    let mut released = Vec::new();
    for record in ctx.registry.all_mut() {
        if record.is_used && Some(&record.id) != keep {
            record.is_used = false;
            released.push(record.id.clone());
        }
    }
    for id in released {
        write(ctx.store, &id, &UplinkUpdate::new().is_used(false));
    }
}

/// Previous winner was bridged: detach it and reset its DHCPv6 client.
fn leave_bridge(ctx: &mut TransitionContext<'_>, prev: &UplinkRecord) {
    let Some(bridge) = prev.bridge.as_deref() else {
        return;
    };
    if let Err(e) = ctx.store.remove_bridge_port(bridge, prev.id.as_str()) {
        tracing::warn!(uplink = %prev.id, bridge, error = %e, "Failed to remove bridge port");
    }
    if let Err(e) = ctx.store.reset_dhcpv6(prev.id.as_str()) {
        tracing::warn!(uplink = %prev.id, error = %e, "Failed to reset DHCPv6 client");
    }
    write(
        ctx.store,
        &prev.id,
        &UplinkUpdate::new().bridge(None).loop_detected(false),
    );
    if let Some(r) = ctx.registry.get_mut(prev.id.as_str()) {
        r.bridge = None;
        r.loop_detected = false;
    }
}

/// Restart sibling managers at most once per role switch, and only while
/// the cloud connection is up.
fn restart_once(ctx: &mut TransitionContext<'_>) -> bool {
    if !ctx.state.cloud_connected {
        return false;
    }
    let transition = ctx.state.role_transitions;
    if ctx.state.last_restart_transition == Some(transition) {
        return false;
    }
    ctx.state.last_restart_transition = Some(transition);

    tracing::warn!(transition, "Switching from bridge to router, restarting managers");
    if let Err(e) = ctx.managers.restart_managers("bridge to router switch") {
        tracing::warn!(error = %e, "Failed to restart managers");
    }
    true
}

/// Derive the station's tunnel and write it unless the store already holds
/// the same one. A rejected or deferred write is retried on the next call.
pub(super) fn ensure_tunnel(ctx: &mut TransitionContext<'_>, station: &UplinkRecord) -> Option<GreTunnel> {
    let Some(row) = ctx.interfaces.get(station.id.as_str()) else {
        tracing::trace!(uplink = %station.id, "No interface state yet, GRE deferred");
        return None;
    };
    let tunnel = match gre::derive_tunnel(row, &ctx.config.gre_prefix, ctx.config.gre_mtu) {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!(uplink = %station.id, error = %e, "Skipping GRE tunnel");
            return None;
        }
    };

    if ctx.tunnels.get(&station.id) == Some(&tunnel) {
        return Some(tunnel);
    }

    match ctx.store.upsert_gre(&tunnel) {
        Ok(()) => {
            tracing::info!(
                uplink = %station.id,
                tunnel = %tunnel.if_name,
                remote = %tunnel.remote_addr,
                "GRE tunnel ensured"
            );
            ctx.tunnels.insert(station.id.clone(), tunnel.clone());
        }
        Err(e) => {
            tracing::warn!(uplink = %station.id, error = %e, "Failed to create GRE tunnel");
        }
    }
    Some(tunnel)
}

fn write(store: &dyn LinkStore, id: &UplinkId, update: &UplinkUpdate) {
    if let Err(e) = store.update_uplink(id.as_str(), update) {
        tracing::warn!(uplink = %id, error = %e, "Uplink update rejected");
    }
}
