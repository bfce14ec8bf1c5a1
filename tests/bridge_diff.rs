//! Bridge membership diff tests.

use std::collections::BTreeSet;
use std::sync::Arc;

use gatelink::clock::ManualClock;
use gatelink::engine::{BridgeDiff, BridgeTracker, Engine, EngineConfig};
use gatelink::store::{
    BridgeRow, Collaborators, InterfaceRow, MemoryStore, RowChange, StoreEvent, StoreWrite,
};

fn set(ports: &[&str]) -> BTreeSet<String> {
    ports.iter().map(|p| (*p).to_string()).collect()
}

fn bridge(name: &str, ports: &[&str]) -> BridgeRow {
    BridgeRow {
        name: name.into(),
        ports: ports.iter().map(|p| (*p).to_string()).collect(),
    }
}

// ============================================================================
// Diff
// ============================================================================

#[test]
fn test_diff_is_order_independent() {
    let old = ["P1", "P2", "P3"];
    let orders = [
        ["P2", "P3", "P4"],
        ["P4", "P3", "P2"],
        ["P3", "P4", "P2"],
    ];

    for new in orders {
        let diff = BridgeDiff::between(old, new);
        assert_eq!(diff.removed, set(&["P1"]), "new order {new:?}");
        assert_eq!(diff.added, set(&["P4"]), "new order {new:?}");
    }
}

#[test]
fn test_diff_with_duplicates() {
    let diff = BridgeDiff::between(["eth1", "eth1", "eth2"], ["eth2", "eth2"]);
    assert_eq!(diff.removed, set(&["eth1"]));
    assert!(diff.added.is_empty());
}

#[test]
fn test_tracker_keeps_bridges_apart() {
    let mut tracker = BridgeTracker::new();
    tracker.update("br-home", &["eth1"]);
    tracker.update("br-guest", &["eth2"]);

    let diff = tracker.update("br-home", &["eth1", "eth3"]);
    assert_eq!(diff.added, set(&["eth3"]));
    assert!(diff.removed.is_empty());
    assert_eq!(tracker.members("br-guest"), Some(&set(&["eth2"])));
}

// ============================================================================
// Engine handling
// ============================================================================

fn setup() -> (Engine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(
        EngineConfig::default(),
        Collaborators::memory(&store),
        Arc::new(ManualClock::at_unix(1_700_000_000)),
    );
    (engine, store)
}

fn port(name: &str, if_type: &str) -> InterfaceRow {
    let mut row = InterfaceRow::new(name);
    row.if_type = Some(if_type.into());
    row
}

fn cancelled(store: &MemoryStore) -> Vec<String> {
    store
        .writes()
        .into_iter()
        .filter_map(|w| match w {
            StoreWrite::CancelDhcpDryrun { if_name } => Some(if_name),
            _ => None,
        })
        .collect()
}

#[test]
fn test_removed_ethernet_port_cancels_dryrun() {
    let (mut engine, store) = setup();
    engine.handle_event(StoreEvent::Interface(RowChange::insert(port("eth1", "eth"))));
    engine.handle_event(StoreEvent::Interface(RowChange::insert(port("wlan0", "vif"))));
    engine.handle_event(StoreEvent::Bridge(RowChange::insert(bridge(
        "br-home",
        &["eth1", "wlan0", "eth2"],
    ))));
    assert!(cancelled(&store).is_empty());

    engine.handle_event(StoreEvent::Bridge(RowChange::modify(
        bridge("br-home", &["eth2"]),
        ["ports"],
    )));

    assert_eq!(cancelled(&store), ["eth1"]);
    assert!(engine.bridges().is_limp("eth1"));
    assert!(engine.bridges().is_limp("wlan0"));
    assert!(!engine.bridges().is_limp("eth2"));
}

#[test]
fn test_rejoining_port_leaves_limp_state() {
    let (mut engine, _store) = setup();
    engine.handle_event(StoreEvent::Bridge(RowChange::insert(bridge("br-home", &["eth1"]))));
    engine.handle_event(StoreEvent::Bridge(RowChange::modify(bridge("br-home", &[]), ["ports"])));
    assert!(engine.bridges().is_limp("eth1"));

    engine.handle_event(StoreEvent::Bridge(RowChange::modify(
        bridge("br-home", &["eth1"]),
        ["ports"],
    )));
    assert!(!engine.bridges().is_limp("eth1"));
    assert!(engine.snapshot().limp_ports.is_empty());
}

#[test]
fn test_deleted_bridge_releases_all_ports() {
    let (mut engine, store) = setup();
    engine.handle_event(StoreEvent::Interface(RowChange::insert(port("eth1", "eth"))));
    engine.handle_event(StoreEvent::Bridge(RowChange::insert(bridge("br-home", &["eth1"]))));
    engine.handle_event(StoreEvent::Bridge(RowChange::delete(bridge("br-home", &[]))));

    assert_eq!(cancelled(&store), ["eth1"]);
    assert!(engine.bridges().members("br-home").is_none());
}
