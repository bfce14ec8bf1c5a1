//! Reachability counter tracking.

use std::sync::Arc;

use super::{ReachabilityCounters, UplinkRegistry};
use crate::error::{Error, Result};
use crate::store::{OnboardingNotifier, OnboardingStatus};
use crate::types::{UnreachableKind, UplinkId};

/// Result of one recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    /// Counter value after the increment.
    pub count: u32,
    /// The counter went from zero to non-zero.
    pub raised: bool,
}

/// Accumulates reachability failures per uplink.
///
/// A counter leaving zero on the used uplink pushes a best-effort status to
/// the onboarding channel. Delivery failures are logged and dropped.
pub struct ReachabilityTracker {
    notifier: Arc<dyn OnboardingNotifier>,
}

impl ReachabilityTracker {
    pub fn new(notifier: Arc<dyn OnboardingNotifier>) -> Self {
        Self { notifier }
    }

    /// Increment one counter.
    pub fn record_failure(
        &self,
        registry: &mut UplinkRegistry,
        name: &str,
        kind: UnreachableKind,
    ) -> Result<FailureOutcome> {
        let record = registry
            .get_mut(name)
            .ok_or_else(|| Error::uplink_missing(name))?;

        let counter = record.counters.get_mut(kind);
        let raised = *counter == 0;
        *counter = counter.saturating_add(1);
        let outcome = FailureOutcome {
            count: *counter,
            raised,
        };

        tracing::debug!(uplink = %name, %kind, count = outcome.count, "Reachability failure");

        if raised && record.is_used {
            self.notify(&record.id, kind);
        }
        Ok(outcome)
    }

    /// Zero all three counters. Returns the values before the reset.
    pub fn reset(&self, registry: &mut UplinkRegistry, name: &str) -> Result<ReachabilityCounters> {
        let record = registry
            .get_mut(name)
            .ok_or_else(|| Error::uplink_missing(name))?;
        Ok(std::mem::take(&mut record.counters))
    }

    /// Compare counters reported by the store against the previous view.
    ///
    /// Returns the kinds that left zero.
    pub fn observe(
        &self,
        id: &UplinkId,
        old: &ReachabilityCounters,
        new: &ReachabilityCounters,
        is_used: bool,
    ) -> Vec<UnreachableKind> {
        let raised: Vec<_> = [
            UnreachableKind::Router,
            UnreachableKind::Cloud,
            UnreachableKind::Internet,
        ]
        .into_iter()
        .filter(|k| old.get(*k) == 0 && new.get(*k) > 0)
        .collect();

        if is_used {
            for kind in &raised {
                self.notify(id, *kind);
            }
        }
        raised
    }

    fn notify(&self, id: &UplinkId, kind: UnreachableKind) {
        let status = OnboardingStatus::Unreachable {
            uplink: id.clone(),
            kind,
        };
        if let Err(e) = self.notifier.signal(&status) {
            tracing::warn!(uplink = %id, %kind, error = %e, "Failed to signal onboarding status");
        }
    }
}
