//! Deadline bookkeeping behind the engine's single wakeup.
//!
//! Deadlines are keyed by `(kind, uplink)`. Arming a key again overwrites its
//! previous deadline, so nothing is left dangling. The runner only ever sleeps
//! until [`TimerManager::next_deadline`].

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::types::UplinkId;
use crate::uplink::UplinkRegistry;

/// What a deadline is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerKind {
    /// Block window expiry.
    Unblock,
    /// DHCP client re-enable after a forced renewal.
    DhcpRetry,
}

pub type TimerKey = (TimerKind, UplinkId);

#[derive(Debug, Default)]
pub struct TimerManager {
    /// Sorted by deadline for O(log n) minimum lookup.
    queue: BTreeSet<(DateTime<Utc>, TimerKey)>,
    /// Current deadline per key.
    armed: HashMap<TimerKey, DateTime<Utc>>,
}

impl TimerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm or re-arm a deadline.
    pub fn arm_deadline(&mut self, kind: TimerKind, uplink: &UplinkId, when: DateTime<Utc>) {
        let key = (kind, uplink.clone());
        if let Some(previous) = self.armed.insert(key.clone(), when) {
            self.queue.remove(&(previous, key.clone()));
        }
        self.queue.insert((when, key));
    }

    pub fn disarm(&mut self, kind: TimerKind, uplink: &UplinkId) -> Option<DateTime<Utc>> {
        let key = (kind, uplink.clone());
        let previous = self.armed.remove(&key)?;
        self.queue.remove(&(previous, key));
        Some(previous)
    }

    pub fn deadline(&self, kind: TimerKind, uplink: &UplinkId) -> Option<DateTime<Utc>> {
        self.armed.get(&(kind, uplink.clone())).copied()
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.queue.first().map(|(at, _)| *at)
    }

    /// Remove and return every key whose deadline is at or before `now`.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<TimerKey> {
        let mut due = Vec::new();
        while let Some((at, key)) = self.queue.first().cloned() {
            if at > now {
                break;
            }
            self.queue.remove(&(at, key.clone()));
            self.armed.remove(&key);
            due.push(key);
        }
        due
    }

    /// Re-derive all unblock deadlines from the registry.
    pub fn sync_unblock(&mut self, registry: &UplinkRegistry) {
        let stale: Vec<UplinkId> = self
            .armed
            .keys()
            .filter(|(kind, id)| {
                *kind == TimerKind::Unblock
                    && registry.get(id.as_str()).and_then(|r| r.unblock_deadline).is_none()
            })
            .map(|(_, id)| id.clone())
            .collect();
        for id in stale {
            self.disarm(TimerKind::Unblock, &id);
        }

        for record in registry.all() {
            if let Some(at) = record.unblock_deadline {
                if self.deadline(TimerKind::Unblock, &record.id) != Some(at) {
                    tracing::trace!(uplink = %record.id, deadline = %at, "Unblock timer armed");
                    self.arm_deadline(TimerKind::Unblock, &record.id, at);
                }
            }
        }
    }

    /// Drop every deadline held for an uplink.
    pub fn forget(&mut self, uplink: &UplinkId) {
        self.disarm(TimerKind::Unblock, uplink);
        self.disarm(TimerKind::DhcpRetry, uplink);
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}
