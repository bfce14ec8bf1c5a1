//! Uplink registry keyed by interface name.

use std::collections::BTreeMap;

use super::UplinkRecord;
use crate::types::UplinkId;

/// In-memory collection of uplink records.
///
/// Ordered by interface name so iteration is deterministic.
#[derive(Debug, Clone, Default)]
pub struct UplinkRegistry {
    records: BTreeMap<UplinkId, UplinkRecord>,
}

impl UplinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record. Returns the previous one.
    pub fn upsert(&mut self, record: UplinkRecord) -> Option<UplinkRecord> {
        self.records.insert(record.id.clone(), record)
    }

    pub fn remove(&mut self, name: &str) -> Option<UplinkRecord> {
        self.records.remove(&UplinkId::from(name))
    }

    pub fn get(&self, name: &str) -> Option<&UplinkRecord> {
        self.records.get(&UplinkId::from(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut UplinkRecord> {
        self.records.get_mut(&UplinkId::from(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(&UplinkId::from(name))
    }

    pub fn all(&self) -> impl Iterator<Item = &UplinkRecord> {
        self.records.values()
    }

    pub fn all_mut(&mut self) -> impl Iterator<Item = &mut UplinkRecord> {
        self.records.values_mut()
    }

    /// The uplink currently flagged as used, if any.
    ///
    /// When stale rows carry the flag on several uplinks the first one by
    /// name is returned; the next transition clears the rest.
    pub fn find_used(&self) -> Option<&UplinkRecord> {
        self.records.values().find(|r| r.is_used)
    }

    pub fn names(&self) -> Vec<UplinkId> {
        self.records.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
