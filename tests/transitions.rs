//! Winner transition tests.
//!
//! Covers the side effects of a change of winner:
//! 1. Device role switches and the previous-uplink snapshot
//! 2. Manager restart on a bridge to router switch
//! 3. GRE tunnel for a WiFi station winner
//! 4. Bridge detach of a bridged previous winner
//! 5. Convergence after rejected store writes
//! 6. VLAN tag apply, confirm and rollback
//! 7. Manager restart after fatal router failures

use std::sync::Arc;
use std::time::Duration;

use gatelink::clock::ManualClock;
use gatelink::engine::{Engine, EngineConfig, EngineEvent, VtagStatus};
use gatelink::store::{
    Collaborators, DeviceRow, GreTunnel, InterfaceRow, MemoryStore, RowChange, StoreEvent,
    StoreWrite, UplinkRow, UplinkUpdate,
};
use gatelink::types::{DeviceRole, UnreachableKind, UplinkId};

// ============================================================================
// Test Infrastructure
// ============================================================================

struct Harness {
    engine: Engine,
    store: Arc<MemoryStore>,
    clock: ManualClock,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::at_unix(1_700_000_000);
        let engine = Engine::new(
            EngineConfig::default(),
            Collaborators::memory(&store),
            Arc::new(clock.clone()),
        );
        Self {
            engine,
            store,
            clock,
        }
    }

    fn send(&mut self, event: StoreEvent) -> bool {
        self.engine.handle_event(event)
    }

    fn uplink(&mut self, row: UplinkRow) -> bool {
        self.send(StoreEvent::Uplink(RowChange::insert(row)))
    }

    fn interface(&mut self, row: InterfaceRow) {
        self.send(StoreEvent::Interface(RowChange::insert(row)));
    }

    fn cloud(&mut self, connected: bool) {
        self.send(StoreEvent::Device(RowChange::insert(DeviceRow {
            is_connected: connected,
            ..Default::default()
        })));
    }

    fn block(&mut self, mut row: UplinkRow) -> bool {
        row.ipv4_state = "blocked".into();
        self.send(StoreEvent::Uplink(RowChange::modify(row, ["ipv4"])))
    }

    /// Let every pending block window run out.
    fn expire_blocks(&mut self) -> bool {
        self.clock.advance(Duration::from_secs(61));
        self.engine.on_timer()
    }

    fn current(&self) -> Option<&str> {
        self.engine.current_uplink().map(UplinkId::as_str)
    }
}

fn row(name: &str, if_type: &str, priority: i32) -> UplinkRow {
    UplinkRow {
        if_name: name.into(),
        if_type: if_type.into(),
        priority: Some(priority),
        has_l2: true,
        has_l3: true,
        ipv4_state: "active".into(),
        ..Default::default()
    }
}

fn station(name: &str) -> InterfaceRow {
    let mut row = InterfaceRow::new(name);
    row.inet_addr = Some("192.168.40.17".into());
    row.netmask = Some("255.255.255.0".into());
    row.ip_assign_scheme = Some("static".into());
    row
}

fn vlan_writes(store: &MemoryStore) -> Vec<Option<u16>> {
    store
        .writes()
        .into_iter()
        .filter_map(|w| match w {
            StoreWrite::Interface { update, .. } => update.vlan_tag,
            _ => None,
        })
        .collect()
}

/// Vendor option with an unrelated sub-option 1 and the tag "100" in 2.
const VENDOR_TAG_100: &str = "AQJ4eQIDMTAw";

// ============================================================================
// Role switch
// ============================================================================

#[test]
fn test_wifi_station_winner_switches_to_bridge_role() {
    let mut h = Harness::new();
    let mut events = h.engine.subscribe();
    h.interface(station("wlan0"));
    h.uplink(row("eth0", "eth", 11));
    h.uplink(row("wlan0", "vif", 9));
    assert_eq!(h.engine.state().device_role, DeviceRole::Router);

    assert!(h.block(row("eth0", "eth", 11)));
    assert_eq!(h.current(), Some("wlan0"));

    let state = h.engine.state();
    assert_eq!(state.device_role, DeviceRole::BridgeMember);
    assert_eq!(state.role_transitions, 1);
    assert_eq!(state.current_priority, Some(9));
    assert!(state.previous_uplink_snapshot.is_none());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&EngineEvent::RoleChanged {
        from: DeviceRole::Router,
        to: DeviceRole::BridgeMember,
    }));
}

#[test]
fn test_return_to_router_snapshots_previous_winner() {
    let mut h = Harness::new();
    h.interface(station("wlan0"));
    h.uplink(row("eth0", "eth", 11));
    h.uplink(row("wlan0", "vif", 9));
    h.block(row("eth0", "eth", 11));

    assert!(h.expire_blocks());
    assert_eq!(h.current(), Some("eth0"));

    let state = h.engine.state();
    assert_eq!(state.device_role, DeviceRole::Router);
    assert_eq!(state.role_transitions, 2);
    let snapshot = state.previous_uplink_snapshot.as_ref().unwrap();
    assert_eq!(snapshot.id.as_str(), "wlan0");
}

#[test]
fn test_same_role_winner_change_keeps_role() {
    let mut h = Harness::new();
    h.uplink(row("lte0", "lte", 5));
    h.uplink(row("eth0", "eth", 11));

    assert_eq!(h.current(), Some("eth0"));
    assert_eq!(h.engine.state().role_transitions, 0);
    assert_eq!(h.engine.state().device_role, DeviceRole::Router);
}

// ============================================================================
// Manager restart
// ============================================================================

#[test]
fn test_bridge_to_router_restarts_managers_once() {
    let mut h = Harness::new();
    h.interface(station("wlan0"));
    h.uplink(row("eth0", "eth", 11));
    h.uplink(row("wlan0", "vif", 9));
    h.block(row("eth0", "eth", 11));
    assert_eq!(h.store.restart_count(), 0);

    h.cloud(true);
    h.expire_blocks();

    assert_eq!(h.current(), Some("eth0"));
    assert_eq!(h.store.restart_count(), 1);

    // Further passes within the same role do not restart again.
    h.uplink(row("lte0", "lte", 5));
    h.engine.recalculate();
    assert_eq!(h.store.restart_count(), 1);
}

#[test]
fn test_no_restart_without_cloud() {
    let mut h = Harness::new();
    h.interface(station("wlan0"));
    h.uplink(row("eth0", "eth", 11));
    h.uplink(row("wlan0", "vif", 9));
    h.block(row("eth0", "eth", 11));
    h.expire_blocks();

    assert_eq!(h.engine.state().device_role, DeviceRole::Router);
    assert_eq!(h.store.restart_count(), 0);
}

// ============================================================================
// GRE
// ============================================================================

#[test]
fn test_station_winner_gets_gre_tunnel() {
    let mut h = Harness::new();
    h.interface(station("wlan0"));
    h.uplink(row("wlan0", "vif", 9));

    let tunnels: Vec<_> = h
        .store
        .writes()
        .into_iter()
        .filter_map(|w| match w {
            StoreWrite::UpsertGre { tunnel } => Some(tunnel),
            _ => None,
        })
        .collect();
    assert_eq!(tunnels.len(), 1);
    assert_eq!(tunnels[0].if_name, "g-wlan0");
    assert_eq!(tunnels[0].remote_addr.to_string(), "192.168.40.1");
    assert_eq!(tunnels[0].mtu, 1562);

    h.send(StoreEvent::Uplink(RowChange::delete(row("wlan0", "vif", 9))));
    assert!(h.store.writes().contains(&StoreWrite::DeleteGre {
        if_name: "g-wlan0".into(),
    }));
}

#[test]
fn test_station_without_address_skips_tunnel() {
    let mut h = Harness::new();
    h.interface(InterfaceRow::new("wlan0"));
    h.uplink(row("wlan0", "vif", 9));

    assert_eq!(h.current(), Some("wlan0"));
    assert_eq!(h.store.count(|w| matches!(w, StoreWrite::UpsertGre { .. })), 0);
}

fn gre_upserts(store: &MemoryStore) -> Vec<GreTunnel> {
    store
        .writes()
        .into_iter()
        .filter_map(|w| match w {
            StoreWrite::UpsertGre { tunnel } => Some(tunnel),
            _ => None,
        })
        .collect()
}

#[test]
fn test_late_station_address_creates_tunnel() {
    let mut h = Harness::new();
    h.uplink(row("wlan0", "vif", 9));
    assert_eq!(h.current(), Some("wlan0"));
    assert!(gre_upserts(&h.store).is_empty());

    h.interface(station("wlan0"));
    let tunnels = gre_upserts(&h.store);
    assert_eq!(tunnels.len(), 1);
    assert_eq!(tunnels[0].remote_addr.to_string(), "192.168.40.1");

    // Same derived tunnel: nothing to write.
    h.interface(station("wlan0"));
    h.engine.recalculate();
    assert_eq!(gre_upserts(&h.store).len(), 1);
}

#[test]
fn test_station_flags_mirrored_onto_tunnel() {
    let mut h = Harness::new();
    h.interface(station("wlan0"));
    h.uplink(row("wlan0", "vif", 9));

    let mut down = station("wlan0");
    down.network = false;
    h.send(StoreEvent::Interface(RowChange::modify(down, ["network"])));

    let tunnels = gre_upserts(&h.store);
    assert_eq!(tunnels.len(), 2);
    assert!(tunnels[0].network);
    assert!(!tunnels[1].network);
}

#[test]
fn test_rejected_tunnel_is_retried() {
    let mut h = Harness::new();
    h.store.reject_writes_for("g-wlan0");
    h.interface(station("wlan0"));
    h.uplink(row("wlan0", "vif", 9));
    assert!(gre_upserts(&h.store).is_empty());

    h.store.accept_writes_for("g-wlan0");
    h.engine.recalculate();
    h.engine.recalculate();

    let tunnels = gre_upserts(&h.store);
    assert_eq!(tunnels.len(), 1);
    assert_eq!(tunnels[0].if_name, "g-wlan0");
}

// ============================================================================
// Bridge detach
// ============================================================================

#[test]
fn test_bridged_previous_winner_is_detached() {
    let mut h = Harness::new();
    let mut bridged = row("eth0", "eth", 10);
    bridged.bridge = Some("br-home".into());
    bridged.loop_detected = true;
    h.uplink(bridged);
    assert_eq!(h.engine.state().current_bridge.as_deref(), Some("br-home"));

    h.uplink(row("eth1", "eth", 12));

    let writes = h.store.writes();
    assert!(writes.contains(&StoreWrite::RemovePort {
        bridge: "br-home".into(),
        port: "eth0".into(),
    }));
    assert!(writes.contains(&StoreWrite::ResetDhcpv6 {
        if_name: "eth0".into(),
    }));
    assert!(h
        .store
        .uplink_updates("eth0")
        .contains(&UplinkUpdate::new().bridge(None).loop_detected(false)));

    let eth0 = h.engine.registry().get("eth0").unwrap();
    assert!(eth0.bridge.is_none());
    assert!(!eth0.loop_detected);
    assert!(h.engine.state().current_bridge.is_none());
}

// ============================================================================
// Rejected writes
// ============================================================================

#[test]
fn test_rejected_write_converges_on_echo() {
    let mut h = Harness::new();
    h.uplink(row("eth0", "eth", 10));
    h.store.reject_writes_for("eth0");

    h.uplink(row("eth1", "eth", 12));
    assert_eq!(h.current(), Some("eth1"));
    assert!(!h.engine.registry().get("eth0").unwrap().is_used);
    assert!(!h
        .store
        .uplink_updates("eth0")
        .contains(&UplinkUpdate::new().is_used(false)));

    // The store still reports the old flag; the engine asserts its own.
    h.store.accept_writes_for("eth0");
    let mut stale = row("eth0", "eth", 10);
    stale.is_used = true;
    h.send(StoreEvent::Uplink(RowChange::modify(stale, ["loop"])));

    assert_eq!(h.current(), Some("eth1"));
    assert!(h
        .store
        .uplink_updates("eth0")
        .contains(&UplinkUpdate::new().is_used(false)));
}

// ============================================================================
// VLAN tags
// ============================================================================

fn tagged_setup() -> Harness {
    let mut h = Harness::new();
    h.uplink(row("eth0", "eth", 11));
    let mut port = InterfaceRow::new("eth0");
    port.ip_assign_scheme = Some("static".into());
    port.inet_addr = Some("10.0.0.2".into());
    port.dhcpc_vendor_option = Some(VENDOR_TAG_100.into());
    h.interface(port);
    h
}

#[test]
fn test_vendor_tag_applied_then_confirmed() {
    let mut h = tagged_setup();
    assert_eq!(vlan_writes(&h.store), [Some(100)]);
    assert_eq!(h.engine.state().vtag.status, VtagStatus::Pending);

    h.cloud(true);
    assert_eq!(h.engine.state().vtag.status, VtagStatus::Applied);

    // Failures once applied leave the tag alone.
    for _ in 0..5 {
        h.engine.record_failure("eth0", UnreachableKind::Router).unwrap();
    }
    assert_eq!(vlan_writes(&h.store), [Some(100)]);
}

#[test]
fn test_vendor_tag_rolled_back_after_failures() {
    let mut h = tagged_setup();

    for _ in 0..3 {
        h.engine.record_failure("eth0", UnreachableKind::Router).unwrap();
    }
    assert_eq!(vlan_writes(&h.store), [Some(100)]);

    h.engine.record_failure("eth0", UnreachableKind::Router).unwrap();
    assert_eq!(vlan_writes(&h.store), [Some(100), None]);
    assert_eq!(h.engine.state().vtag.status, VtagStatus::NotUsed);
    assert_eq!(h.engine.state().vtag.rejected, [100]);

    // The same tag offered again is ignored.
    let mut port = InterfaceRow::new("eth0");
    port.dhcpc_vendor_option = Some(VENDOR_TAG_100.into());
    h.send(StoreEvent::Interface(RowChange::modify(port, ["dhcpc_vendor_option"])));
    assert_eq!(vlan_writes(&h.store), [Some(100), None]);
}

#[test]
fn test_malformed_vendor_option_is_skipped() {
    let mut h = Harness::new();
    h.uplink(row("eth0", "eth", 11));
    let mut port = InterfaceRow::new("eth0");
    port.dhcpc_vendor_option = Some("!!not base64!!".into());
    h.interface(port);

    assert!(vlan_writes(&h.store).is_empty());
    assert_eq!(h.current(), Some("eth0"));
    assert_eq!(h.engine.state().vtag.status, VtagStatus::NotUsed);
}

#[test]
fn test_vendor_tag_rollback_targets_tagged_uplink() {
    let mut h = tagged_setup();
    h.uplink(row("eth1", "eth", 12));
    assert_eq!(h.current(), Some("eth1"));

    for _ in 0..4 {
        h.engine.record_failure("eth1", UnreachableKind::Router).unwrap();
    }

    let removals: Vec<String> = h
        .store
        .writes()
        .into_iter()
        .filter_map(|w| match w {
            StoreWrite::Interface { if_name, update } if update.vlan_tag == Some(None) => {
                Some(if_name)
            }
            _ => None,
        })
        .collect();
    assert_eq!(removals, ["eth0"]);
}

// ============================================================================
// Fatal router failures
// ============================================================================

fn restarts(store: &MemoryStore) -> usize {
    store.count(|w| matches!(w, StoreWrite::RestartManagers { .. }))
}

#[test]
fn test_fatal_router_failures_restart_managers_once() {
    let mut h = Harness::new();
    h.interface(station("wlan0"));
    h.uplink(row("wlan0", "vif", 9));
    assert_eq!(h.engine.state().device_role, DeviceRole::BridgeMember);
    let mut events = h.engine.subscribe();

    for _ in 0..8 {
        h.engine.record_failure("wlan0", UnreachableKind::Router).unwrap();
    }
    assert_eq!(restarts(&h.store), 0);

    h.engine.record_failure("wlan0", UnreachableKind::Router).unwrap();
    assert_eq!(restarts(&h.store), 1);
    assert_eq!(events.try_recv().unwrap(), EngineEvent::ManagersRestarted);

    h.engine.record_failure("wlan0", UnreachableKind::Router).unwrap();
    assert_eq!(restarts(&h.store), 1);
}

#[test]
fn test_fatal_router_failures_ignored_on_router() {
    let mut h = Harness::new();
    h.uplink(row("eth0", "eth", 11));
    assert_eq!(h.engine.state().device_role, DeviceRole::Router);

    for _ in 0..12 {
        h.engine.record_failure("eth0", UnreachableKind::Router).unwrap();
    }
    assert_eq!(restarts(&h.store), 0);
}

#[test]
fn test_fatal_router_failures_wait_for_pending_tag() {
    let mut h = Harness::new();
    h.interface(station("wlan0"));
    h.uplink(row("wlan0", "vif", 9));
    for _ in 0..8 {
        h.engine.record_failure("wlan0", UnreachableKind::Router).unwrap();
    }

    let mut port = station("wlan0");
    port.dhcpc_vendor_option = Some(VENDOR_TAG_100.into());
    h.send(StoreEvent::Interface(RowChange::modify(port, ["dhcpc_vendor_option"])));
    assert_eq!(h.engine.state().vtag.status, VtagStatus::Pending);

    // Failures 9 to 12 go to the pending tag, which rolls back on the last.
    for _ in 0..4 {
        h.engine.record_failure("wlan0", UnreachableKind::Router).unwrap();
    }
    assert_eq!(h.engine.state().vtag.status, VtagStatus::NotUsed);
    assert_eq!(restarts(&h.store), 0);

    h.engine.record_failure("wlan0", UnreachableKind::Router).unwrap();
    assert_eq!(restarts(&h.store), 1);
}
