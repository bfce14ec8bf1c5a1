//! Uplink arbitration engine.
//!
//! The [`Engine`] owns the uplink registry and the global link state. Store
//! notifications are folded into the registry one at a time, each followed by
//! a full [`Engine::recalculate`] pass:
//!
//! ```text
//!   StoreEvent ──► ingest ──► registry / counters
//!                                  │
//!                                  ▼
//!                        arbitration::plan (pure)
//!                                  │
//!              ┌───────────────────┼────────────────────┐
//!              ▼                   ▼                    ▼
//!       block deadlines     transition::apply      dhcp::sync_dhcp
//!              │                   │                    │
//!              └──────────► LinkStore writes ◄──────────┘
//!                                  │
//!                                  ▼
//!                          TimerManager re-arm
//! ```
//!
//! Nothing in here blocks or awaits; the async loop lives in [`runner`].

pub mod arbitration;
pub mod bridge;
pub mod dhcp;
pub mod gre;
pub mod runner;
pub mod state;
pub mod timer;
pub mod transition;
pub mod vtag;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::clock::Clock;
use crate::error::{Error, RecordKind, Result};
use crate::events::{EventKind, UplinkEventLog};
use crate::store::{
    BridgeRow, ChangeKind, Collaborators, DeviceRow, GreTunnel, InterfaceRow, InterfaceUpdate,
    RowChange, StoreEvent, UplinkRow, UplinkUpdate,
};
use crate::types::{AddressFamily, DeviceRole, InterfaceType, IpAssignScheme, LinkState, UnreachableKind, UplinkId};
use crate::uplink::{DefaultPriorities, FailureOutcome, ReachabilityTracker, UplinkRecord, UplinkRegistry};

pub use arbitration::{DeadlineAction, DeadlineUpdate, Plan};
pub use bridge::{BridgeDiff, BridgeTracker};
pub use dhcp::{sync_dhcp, DhcpAction, DhcpDecision, IpConfig};
pub use runner::EngineHandle;
pub use state::{GlobalLinkState, VtagState, VtagStatus};
pub use timer::{TimerKind, TimerManager};
pub use transition::TransitionOutcome;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Quarantine window for a blocked uplink.
    #[serde(default = "default_block_window", with = "humantime_serde")]
    pub block_window: Duration,

    /// Delay before the DHCP client is re-enabled after a forced renewal.
    #[serde(default = "default_dhcp_retry", with = "humantime_serde")]
    pub dhcp_retry: Duration,

    /// GRE interface name prefix.
    #[serde(default = "default_gre_prefix")]
    pub gre_prefix: String,

    /// GRE interface MTU.
    #[serde(default = "default_gre_mtu")]
    pub gre_mtu: u32,

    /// Every Nth router failure on the used uplink forces a DHCP renewal.
    #[serde(default = "default_router_refresh")]
    pub router_refresh_threshold: u32,

    /// Every Nth internet failure on the used uplink forces a DHCP renewal.
    #[serde(default = "default_internet_refresh")]
    pub internet_refresh_threshold: u32,

    /// Router failures past this count restart the managers of a device
    /// that is not acting as the router.
    #[serde(default = "default_fatal_threshold")]
    pub fatal_threshold: u32,

    /// Failures tolerated while a VLAN tag is pending.
    #[serde(default = "default_vtag_threshold")]
    pub vtag_failure_threshold: u32,

    /// Vendor option sub-code that carries the VLAN tag.
    #[serde(default = "default_vtag_suboption")]
    pub vtag_suboption: u8,

    /// Priorities for uplink rows that carry none.
    #[serde(default)]
    pub default_priorities: DefaultPriorities,
}

fn default_block_window() -> Duration {
    Duration::from_secs(60)
}

fn default_dhcp_retry() -> Duration {
    Duration::from_secs(3)
}

fn default_gre_prefix() -> String {
    "g-".into()
}

fn default_gre_mtu() -> u32 {
    1562
}

fn default_router_refresh() -> u32 {
    3
}

fn default_internet_refresh() -> u32 {
    4
}

fn default_fatal_threshold() -> u32 {
    8
}

fn default_vtag_threshold() -> u32 {
    3
}

fn default_vtag_suboption() -> u8 {
    2
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_window: default_block_window(),
            dhcp_retry: default_dhcp_retry(),
            gre_prefix: default_gre_prefix(),
            gre_mtu: default_gre_mtu(),
            router_refresh_threshold: default_router_refresh(),
            internet_refresh_threshold: default_internet_refresh(),
            fatal_threshold: default_fatal_threshold(),
            vtag_failure_threshold: default_vtag_threshold(),
            vtag_suboption: default_vtag_suboption(),
            default_priorities: DefaultPriorities::default(),
        }
    }
}

/// Events broadcast by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The winning uplink changed.
    WinnerChanged {
        previous: Option<UplinkId>,
        current: Option<UplinkId>,
    },
    /// Device role switched.
    RoleChanged { from: DeviceRole, to: DeviceRole },
    /// Uplink quarantined until the deadline.
    UplinkBlocked { uplink: UplinkId, until: DateTime<Utc> },
    /// Uplink released for a retry.
    UplinkUnblocking(UplinkId),
    /// Sibling managers were restarted.
    ManagersRestarted,
}

/// DHCP decisions for both address families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhcpSync {
    pub ipv4: DhcpDecision,
    /// Only evaluated when the interface has an IPv6 assignment scheme.
    pub ipv6: Option<DhcpDecision>,
}

/// Point-in-time view for status output.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub state: GlobalLinkState,
    pub uplinks: Vec<UplinkRecord>,
    pub next_wakeup: Option<DateTime<Utc>>,
    pub limp_ports: Vec<String>,
}

/// The arbitration engine. Single owner, no interior locking.
pub struct Engine {
    config: EngineConfig,
    registry: UplinkRegistry,
    state: GlobalLinkState,
    interfaces: HashMap<String, InterfaceRow>,
    bridges: BridgeTracker,
    timers: TimerManager,
    /// Last tunnel the store accepted, per station.
    tunnels: BTreeMap<UplinkId, GreTunnel>,
    tracker: ReachabilityTracker,
    /// Set once managers were restarted for the current failure streak.
    fatal_restarted: bool,
    event_log: UplinkEventLog,
    collab: Collaborators,
    clock: Arc<dyn Clock>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl Engine {
    pub fn new(config: EngineConfig, collab: Collaborators, clock: Arc<dyn Clock>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            registry: UplinkRegistry::new(),
            state: GlobalLinkState::new(),
            interfaces: HashMap::new(),
            bridges: BridgeTracker::new(),
            timers: TimerManager::new(),
            tunnels: BTreeMap::new(),
            tracker: ReachabilityTracker::new(collab.notifier.clone()),
            fatal_restarted: false,
            event_log: UplinkEventLog::new(crate::events::EventLogConfig::default()),
            collab,
            clock,
            event_tx,
        }
    }

    /// Replace the in-memory event log (e.g. one restored from disk).
    pub fn with_event_log(mut self, log: UplinkEventLog) -> Self {
        self.event_log = log;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &GlobalLinkState {
        &self.state
    }

    pub fn registry(&self) -> &UplinkRegistry {
        &self.registry
    }

    pub fn event_log(&self) -> &UplinkEventLog {
        &self.event_log
    }

    pub fn bridges(&self) -> &BridgeTracker {
        &self.bridges
    }

    pub fn current_uplink(&self) -> Option<&UplinkId> {
        self.state.current_uplink.as_ref()
    }

    /// Earliest outstanding deadline; `None` means idle until the next event.
    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.timers.next_deadline()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            state: self.state.clone(),
            uplinks: self.registry.all().cloned().collect(),
            next_wakeup: self.next_wakeup(),
            limp_ports: self.bridges.limp_ports().iter().cloned().collect(),
        }
    }

    /// Fold one notification into the engine and recalculate.
    ///
    /// Returns whether the winner changed.
    pub fn handle_event(&mut self, event: StoreEvent) -> bool {
        match event {
            StoreEvent::Uplink(change) => self.ingest_uplink(change),
            StoreEvent::Interface(change) => self.ingest_interface(change),
            StoreEvent::Bridge(change) => self.ingest_bridge(change),
            StoreEvent::Device(change) => self.ingest_device(change),
            StoreEvent::Reachability { if_name, kind } => {
                if let Err(e) = self.record_failure(&if_name, kind) {
                    tracing::warn!(uplink = %if_name, %kind, error = %e, "Dropping reachability report");
                }
            }
        }
        self.recalculate()
    }

    /// Run one arbitration pass. Returns whether the winner changed.
    pub fn recalculate(&mut self) -> bool {
        let now = self.clock.now();
        let incumbent = self
            .state
            .current_uplink
            .clone()
            .or_else(|| self.registry.find_used().map(|r| r.id.clone()));

        let plan = arbitration::plan(
            self.registry.all(),
            incumbent.as_ref(),
            now,
            self.config.block_window,
        );

        for update in &plan.deadline_updates {
            self.apply_deadline(update);
        }

        let changed = plan.winner_changed(self.state.current_uplink.as_ref());
        if changed {
            self.change_winner(plan.winner.as_ref());
        } else {
            self.release_stale_used();
            self.ensure_current_tunnel();
        }

        self.timers.sync_unblock(&self.registry);
        changed
    }

    /// Handle an expired wakeup.
    pub fn on_timer(&mut self) -> bool {
        let now = self.clock.now();
        for (kind, uplink) in self.timers.take_due(now) {
            if kind == TimerKind::DhcpRetry {
                if !self.state.is_current(uplink.as_str()) {
                    tracing::debug!(uplink = %uplink, "Dropping DHCP retry for standby uplink");
                    continue;
                }
                tracing::debug!(uplink = %uplink, "DHCP retry due");
                if let Err(e) = self.sync_ip(uplink.as_str(), false) {
                    tracing::warn!(uplink = %uplink, error = %e, "DHCP retry skipped");
                }
            }
        }
        self.recalculate()
    }

    /// Count one reachability failure against an uplink.
    pub fn record_failure(&mut self, name: &str, kind: UnreachableKind) -> Result<FailureOutcome> {
        let outcome = self.tracker.record_failure(&mut self.registry, name, kind)?;
        if !self.state.is_current(name) {
            return Ok(outcome);
        }

        if outcome.raised {
            self.log_event(false, kind.into());
        }

        let refresh_every = match kind {
            UnreachableKind::Router => Some(self.config.router_refresh_threshold),
            UnreachableKind::Internet => Some(self.config.internet_refresh_threshold),
            UnreachableKind::Cloud => None,
        };
        if let Some(threshold) = refresh_every {
            if outcome.count % threshold.max(1) == 0 {
                tracing::info!(uplink = %name, %kind, count = outcome.count, "Uplink unreachable, renewing DHCP lease");
                if let Err(e) = self.sync_ip(name, true) {
                    tracing::warn!(uplink = %name, error = %e, "DHCP refresh skipped");
                }
            }
        }

        if kind == UnreachableKind::Router {
            let vtag_pending = self.state.vtag.status == VtagStatus::Pending;
            let tagged = self.state.vtag.uplink.clone();
            if let vtag::VtagEffect::Remove(tag) =
                vtag::record_failure(&mut self.state.vtag, self.config.vtag_failure_threshold)
            {
                let target = tagged.as_ref().map_or(name, UplinkId::as_str);
                self.write_interface(target, &InterfaceUpdate {
                    vlan_tag: Some(None),
                    ..Default::default()
                });
                tracing::info!(uplink = %target, tag, "Vlan tag removed");
            }

            if !vtag_pending
                && !self.fatal_restarted
                && self.state.device_role != DeviceRole::Router
                && outcome.count > self.config.fatal_threshold
            {
                self.fatal_restarted = true;
                tracing::warn!(uplink = %name, count = outcome.count, "Router failures past fatal threshold, restarting managers");
                if let Err(e) = self.collab.managers.restart_managers("fatal router failures") {
                    tracing::warn!(error = %e, "Failed to restart managers");
                } else {
                    self.emit(EngineEvent::ManagersRestarted);
                }
            }
        }
        Ok(outcome)
    }

    /// Zero the counters of an uplink, in memory and in the store.
    pub fn reset_counters(&mut self, name: &str) -> Result<()> {
        let previous = self.tracker.reset(&mut self.registry, name)?;
        self.write_uplink(name, &UplinkUpdate::new().clear_counters());

        if self.state.is_current(name) {
            self.fatal_restarted = false;
            for kind in [UnreachableKind::Router, UnreachableKind::Cloud, UnreachableKind::Internet] {
                if previous.get(kind) > 0 {
                    self.log_event(true, kind.into());
                }
            }
        }
        Ok(())
    }

    /// Bring the DHCP client of `name` in line with its address state.
    pub fn sync_ip(&mut self, name: &str, refresh: bool) -> Result<DhcpSync> {
        let row = self.interfaces.get(name).ok_or_else(|| Error::LookupMiss {
            kind: RecordKind::Interface,
            name: name.to_string(),
        })?;

        let ipv4 = sync_dhcp(&IpConfig::from_row(row, AddressFamily::Ipv4), refresh);
        let ipv6 = row
            .ipv6_assign_scheme
            .as_ref()
            .map(|_| sync_dhcp(&IpConfig::from_row(row, AddressFamily::Ipv6), refresh));

        let mut update = InterfaceUpdate::default();
        let mut retry = false;
        match ipv4.action {
            DhcpAction::Keep => {}
            DhcpAction::EnableClient => update.ip_assign_scheme = Some(IpAssignScheme::Dhcp),
            DhcpAction::DisableClient => {
                update.ip_assign_scheme = Some(IpAssignScheme::None);
                retry = true;
            }
        }
        match ipv6.map(|d| d.action) {
            None | Some(DhcpAction::Keep) => {}
            Some(DhcpAction::EnableClient) => update.ipv6_assign_scheme = Some(IpAssignScheme::Dhcp),
            Some(DhcpAction::DisableClient) => {
                update.ipv6_assign_scheme = Some(IpAssignScheme::None);
                retry = true;
            }
        }

        if update != InterfaceUpdate::default() {
            tracing::debug!(uplink = %name, ?update, refresh, "DHCP client change");
            self.write_interface(name, &update);
            // Mirror the write so a retry sees the new scheme before the
            // store echoes it back.
            if let Some(row) = self.interfaces.get_mut(name) {
                if let Some(scheme) = update.ip_assign_scheme {
                    row.ip_assign_scheme = Some(scheme.as_str().to_string());
                }
                if let Some(scheme) = update.ipv6_assign_scheme {
                    row.ipv6_assign_scheme = Some(scheme.as_str().to_string());
                }
            }
        }
        if retry {
            let at = self.clock.now() + to_chrono(self.config.dhcp_retry);
            self.timers.arm_deadline(TimerKind::DhcpRetry, &UplinkId::from(name), at);
        }

        Ok(DhcpSync { ipv4, ipv6 })
    }

    fn ingest_uplink(&mut self, change: RowChange<UplinkRow>) {
        let name = change.row.if_name.clone();
        if change.kind == ChangeKind::Delete {
            self.remove_uplink(&name);
            return;
        }

        let (mut record, defaulted) =
            match UplinkRecord::from_row(&change.row, &self.config.default_priorities) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(uplink = %name, error = %e, "Ignoring malformed uplink row");
                    return;
                }
            };

        if defaulted {
            tracing::debug!(uplink = %name, priority = record.priority, "Using default priority");
            self.write_uplink(&name, &UplinkUpdate::new().priority(record.priority));
        }

        if let Some(port) = self.interfaces.get(&name) {
            if record.has_l3 && port.is_port_inactive() {
                record.has_l3 = false;
                self.write_uplink(&name, &UplinkUpdate::new().has_l3(false));
            }
        }

        let mut released = false;
        if let Some(old) = self.registry.get(&name).cloned() {
            // The used flag and a pending deadline are engine owned; a row
            // that lags our own write must not undo them.
            if record.is_used != old.is_used {
                tracing::debug!(uplink = %name, used = old.is_used, "Re-asserting used flag");
                self.write_uplink(&name, &UplinkUpdate::new().is_used(old.is_used));
            }
            record.is_used = old.is_used;
            // Counters are bumped in memory; keep them unless the row names them.
            for (kind, column) in COUNTER_COLUMNS {
                if !change.is_changed(column) {
                    *record.counters.get_mut(kind) = old.counters.get(kind);
                }
            }
            if record.unblock_deadline.is_none() && record.is_blocked_any() {
                record.unblock_deadline = old.unblock_deadline;
            }

            let raised = self
                .tracker
                .observe(&record.id, &old.counters, &record.counters, record.is_used);
            if self.state.is_current(&name) {
                for kind in raised {
                    self.log_event(false, kind.into());
                }
                if old.ntp_synced != record.ntp_synced {
                    self.log_event(record.ntp_synced, EventKind::Ntp);
                }
            }

            released = AddressFamily::ALL
                .into_iter()
                .any(|f| old.state(f).is_quarantined() && record.state(f) == LinkState::Active);
        } else {
            tracing::debug!(uplink = %name, if_type = %record.if_type, "New uplink");
        }

        self.registry.upsert(record);

        if released {
            tracing::info!(uplink = %name, "Uplink active again, clearing counters");
            if let Err(e) = self.reset_counters(&name) {
                tracing::warn!(uplink = %name, error = %e, "Counter reset skipped");
            }
        }
    }

    fn remove_uplink(&mut self, name: &str) {
        let Some(record) = self.registry.remove(name) else {
            tracing::debug!(uplink = %name, "Delete for unknown uplink");
            return;
        };
        tracing::info!(uplink = %name, "Uplink removed");
        self.timers.forget(&record.id);

        if let Some(tunnel) = self.tunnels.remove(&record.id) {
            if let Err(e) = self.collab.store.delete_gre(&tunnel.if_name) {
                tracing::warn!(uplink = %name, tunnel = %tunnel.if_name, error = %e, "Failed to delete GRE tunnel");
            }
        }
    }

    fn ingest_interface(&mut self, change: RowChange<InterfaceRow>) {
        let name = change.row.if_name.clone();
        if change.kind == ChangeKind::Delete {
            self.interfaces.remove(&name);
            return;
        }

        if change.row.is_port_inactive() {
            if let Some(record) = self.registry.get_mut(&name).filter(|r| r.has_l3) {
                record.has_l3 = false;
                tracing::info!(uplink = %name, "Port inactive, dropping L3");
                self.write_uplink(&name, &UplinkUpdate::new().has_l3(false));
            }
        }

        let vendor_changed = change.is_changed("dhcpc_vendor_option");
        let address_changed = ADDRESS_COLUMNS.iter().any(|c| change.is_changed(c));
        self.interfaces.insert(name.clone(), change.row);

        if !self.state.is_current(&name) {
            return;
        }
        // A pending retry owns the client until it fires.
        let retry_pending = self
            .timers
            .deadline(TimerKind::DhcpRetry, &UplinkId::from(name.as_str()))
            .is_some();
        if address_changed && !retry_pending {
            if let Err(e) = self.sync_ip(&name, false) {
                tracing::warn!(uplink = %name, error = %e, "DHCP sync skipped");
            }
        }
        if vendor_changed {
            self.offer_vtag(&name);
        }
    }

    fn ingest_bridge(&mut self, change: RowChange<BridgeRow>) {
        let bridge = change.row.name.clone();
        let diff = match change.kind {
            ChangeKind::Delete => self.bridges.remove(&bridge),
            ChangeKind::Insert | ChangeKind::Modify => self.bridges.update(&bridge, &change.row.ports),
        };
        if diff.is_empty() {
            return;
        }
        tracing::debug!(%bridge, removed = ?diff.removed, added = ?diff.added, "Bridge membership changed");

        for port in &diff.removed {
            if self.is_ethernet_port(port) {
                if let Err(e) = self.collab.store.cancel_dhcp_dryrun(port) {
                    tracing::warn!(%port, error = %e, "Failed to cancel DHCP dry run");
                }
            }
        }
    }

    fn ingest_device(&mut self, change: RowChange<DeviceRow>) {
        let connected = change.kind != ChangeKind::Delete && change.row.is_connected;
        if connected == self.state.cloud_connected {
            return;
        }
        self.state.cloud_connected = connected;
        tracing::info!(connected, "Cloud connectivity changed");

        if connected {
            vtag::confirm(&mut self.state.vtag);
        }
    }

    fn is_ethernet_port(&self, port: &str) -> bool {
        if let Some(record) = self.registry.get(port) {
            return record.if_type.is_ethernet();
        }
        self.interfaces
            .get(port)
            .and_then(|row| row.if_type.as_deref())
            .and_then(|t| t.parse::<InterfaceType>().ok())
            .is_some_and(InterfaceType::is_ethernet)
    }

    fn offer_vtag(&mut self, name: &str) {
        let Some(blob) = self
            .interfaces
            .get(name)
            .and_then(|row| row.dhcpc_vendor_option.clone())
        else {
            return;
        };

        match vtag::parse_vendor_tag(&blob, self.config.vtag_suboption) {
            Ok(Some(tag)) => {
                if let vtag::VtagEffect::Apply(tag) =
                    vtag::offer(&mut self.state.vtag, &UplinkId::from(name), tag)
                {
                    self.write_interface(name, &InterfaceUpdate {
                        vlan_tag: Some(Some(tag)),
                        ..Default::default()
                    });
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(uplink = %name, error = %e, "Skipping vlan tag extraction");
            }
        }
    }

    fn apply_deadline(&mut self, update: &DeadlineUpdate) {
        let name = update.uplink.as_str();
        let Some(record) = self.registry.get_mut(name) else {
            return;
        };

        match &update.action {
            DeadlineAction::Arm(at) => {
                record.unblock_deadline = Some(*at);
                tracing::info!(uplink = %name, until = %at, "Uplink blocked");
                self.write_uplink(name, &UplinkUpdate::new().unblock_ts(Some(*at)));
                self.emit(EngineEvent::UplinkBlocked {
                    uplink: update.uplink.clone(),
                    until: *at,
                });
            }
            DeadlineAction::Expire(families) => {
                let mut write = UplinkUpdate::new().unblock_ts(None);
                for family in families {
                    record.set_state(*family, LinkState::Unblocking);
                    write = match family {
                        AddressFamily::Ipv4 => write.ipv4(LinkState::Unblocking),
                        AddressFamily::Ipv6 => write.ipv6(LinkState::Unblocking),
                    };
                }
                record.unblock_deadline = None;
                tracing::info!(uplink = %name, ?families, "Block window expired, unblocking");
                self.write_uplink(name, &write);
                self.emit(EngineEvent::UplinkUnblocking(update.uplink.clone()));
            }
            DeadlineAction::Clear => {
                record.unblock_deadline = None;
                self.write_uplink(name, &UplinkUpdate::new().unblock_ts(None));
            }
        }
    }

    fn change_winner(&mut self, next: Option<&UplinkId>) {
        self.fatal_restarted = false;
        let store = self.collab.store.clone();
        let managers = self.collab.managers.clone();
        let outcome = {
            let mut ctx = transition::TransitionContext {
                registry: &mut self.registry,
                state: &mut self.state,
                store: store.as_ref(),
                managers: managers.as_ref(),
                interfaces: &self.interfaces,
                tunnels: &mut self.tunnels,
                config: &self.config,
            };
            transition::apply(&mut ctx, next)
        };

        self.emit(EngineEvent::WinnerChanged {
            previous: outcome.previous.clone(),
            current: outcome.current.clone(),
        });
        if let Some((from, to)) = outcome.role_change {
            self.emit(EngineEvent::RoleChanged { from, to });
        }
        if outcome.managers_restarted {
            self.emit(EngineEvent::ManagersRestarted);
        }

        self.log_event(next.is_some(), EventKind::Link);

        if let Some(id) = next {
            if let Err(e) = self.sync_ip(id.as_str(), false) {
                tracing::debug!(uplink = %id, error = %e, "DHCP sync deferred");
            }
            self.offer_vtag(id.as_str());
        }
    }

    /// Keep the GRE tunnel of a station winner in line with its interface.
    fn ensure_current_tunnel(&mut self) {
        let Some(station) = self
            .state
            .current_uplink
            .as_ref()
            .and_then(|id| self.registry.get(id.as_str()))
            .filter(|r| r.if_type == InterfaceType::WifiStation)
            .cloned()
        else {
            return;
        };

        let store = self.collab.store.clone();
        let managers = self.collab.managers.clone();
        let mut ctx = transition::TransitionContext {
            registry: &mut self.registry,
            state: &mut self.state,
            store: store.as_ref(),
            managers: managers.as_ref(),
            interfaces: &self.interfaces,
            tunnels: &mut self.tunnels,
            config: &self.config,
        };
        transition::ensure_tunnel(&mut ctx, &station);
    }

    /// Drop used flags that rows restored from the store still carry.
    fn release_stale_used(&mut self) {
        let stale: Vec<UplinkId> = self
            .registry
            .all()
            .filter(|r| r.is_used && !self.state.is_current(r.id.as_str()))
            .map(|r| r.id.clone())
            .collect();
        for id in stale {
            if let Some(record) = self.registry.get_mut(id.as_str()) {
                record.is_used = false;
            }
            tracing::debug!(uplink = %id, "Clearing stale used flag");
            self.write_uplink(id.as_str(), &UplinkUpdate::new().is_used(false));
        }
    }

    fn log_event(&mut self, connected: bool, kind: EventKind) {
        let timestamp = self.clock.now().timestamp();
        if self.event_log.add_event(timestamp, connected, kind) {
            if let Err(e) = self.event_log.persist() {
                tracing::warn!(error = %e, "Failed to persist uplink events");
            }
        }
    }

    fn write_uplink(&self, name: &str, update: &UplinkUpdate) {
        if let Err(e) = self.collab.store.update_uplink(name, update) {
            tracing::warn!(uplink = %name, error = %e, "Uplink update rejected");
        }
    }

    fn write_interface(&self, name: &str, update: &InterfaceUpdate) {
        if let Err(e) = self.collab.store.update_interface(name, update) {
            tracing::warn!(uplink = %name, error = %e, "Interface update rejected");
        }
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}

const COUNTER_COLUMNS: [(UnreachableKind, &str); 3] = [
    (UnreachableKind::Router, "unreachable_router_counter"),
    (UnreachableKind::Cloud, "unreachable_cloud_counter"),
    (UnreachableKind::Internet, "unreachable_internet_counter"),
];

const ADDRESS_COLUMNS: [&str; 4] = ["ip_assign_scheme", "inet_addr", "ipv6_assign_scheme", "inet6_addr"];

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_default()
}
