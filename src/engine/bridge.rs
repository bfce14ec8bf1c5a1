//! Bridge membership tracking.

use std::collections::{BTreeSet, HashMap};

/// Ports that left and joined a bridge between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeDiff {
    pub removed: BTreeSet<String>,
    pub added: BTreeSet<String>,
}

impl BridgeDiff {
    /// Set difference in both directions. Port order does not matter.
    pub fn between<'a, O, N>(old: O, new: N) -> Self
    where
        O: IntoIterator<Item = &'a str>,
        N: IntoIterator<Item = &'a str>,
    {
        let old: BTreeSet<&str> = old.into_iter().collect();
        let new: BTreeSet<&str> = new.into_iter().collect();
        Self {
            removed: old.difference(&new).map(|p| (*p).to_string()).collect(),
            added: new.difference(&old).map(|p| (*p).to_string()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// Last seen membership of every bridge, plus ports in limp state.
///
/// A port is limp from the moment it leaves a bridge until it joins one
/// again.
#[derive(Debug, Default)]
pub struct BridgeTracker {
    snapshots: HashMap<String, BTreeSet<String>>,
    limp: BTreeSet<String>,
}

impl BridgeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new port list for `bridge` and return what changed.
    pub fn update<S: AsRef<str>>(&mut self, bridge: &str, ports: &[S]) -> BridgeDiff {
        let new: BTreeSet<String> = ports.iter().map(|p| p.as_ref().to_string()).collect();
        let old = self.snapshots.insert(bridge.to_string(), new.clone()).unwrap_or_default();
        let diff = BridgeDiff::between(old.iter().map(String::as_str), new.iter().map(String::as_str));
        self.apply_limp(&diff);
        diff
    }

    /// Bridge disappeared: all of its ports count as removed.
    pub fn remove(&mut self, bridge: &str) -> BridgeDiff {
        let old = self.snapshots.remove(bridge).unwrap_or_default();
        let diff = BridgeDiff {
            removed: old,
            added: BTreeSet::new(),
        };
        self.apply_limp(&diff);
        diff
    }

    fn apply_limp(&mut self, diff: &BridgeDiff) {
        for port in &diff.removed {
            self.limp.insert(port.clone());
        }
        for port in &diff.added {
            self.limp.remove(port);
        }
    }

    pub fn members(&self, bridge: &str) -> Option<&BTreeSet<String>> {
        self.snapshots.get(bridge)
    }

    pub fn is_limp(&self, port: &str) -> bool {
        self.limp.contains(port)
    }

    pub fn limp_ports(&self) -> &BTreeSet<String> {
        &self.limp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_snapshot_adds_everything() {
        let mut tracker = BridgeTracker::new();
        let diff = tracker.update("br-home", &["eth1", "eth2"]);
        assert_eq!(diff.added.len(), 2);
        assert!(diff.removed.is_empty());
        assert_eq!(tracker.members("br-home").map(BTreeSet::len), Some(2));
    }

    #[test]
    fn test_limp_bookkeeping() {
        let mut tracker = BridgeTracker::new();
        tracker.update("br-home", &["eth1", "eth2"]);
        tracker.update("br-home", &["eth2"]);
        assert!(tracker.is_limp("eth1"));

        tracker.update("br-home", &["eth2", "eth1"]);
        assert!(!tracker.is_limp("eth1"));
        assert!(tracker.limp_ports().is_empty());
    }

    #[test]
    fn test_same_ports_reordered_is_empty_diff() {
        let mut tracker = BridgeTracker::new();
        tracker.update("br-home", &["eth1", "eth2", "eth3"]);
        assert!(tracker.update("br-home", &["eth3", "eth1", "eth2"]).is_empty());
    }

    #[test]
    fn test_remove_bridge() {
        let mut tracker = BridgeTracker::new();
        tracker.update("br-home", &["eth1"]);
        let diff = tracker.remove("br-home");
        assert!(diff.removed.contains("eth1"));
        assert!(tracker.is_limp("eth1"));
        assert!(tracker.members("br-home").is_none());
    }
}
