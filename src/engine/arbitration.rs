//! Uplink arbitration.
//!
//! [`plan`] is a pure function from the registry contents to the desired
//! outcome of one pass: which block deadlines to arm or expire, who wins, and
//! when the next pass must run. The engine applies the plan separately.

use std::borrow::Cow;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::types::{AddressFamily, LinkState, UplinkId};
use crate::uplink::UplinkRecord;

/// Quarantine window used when the configured one cannot be represented.
pub const DEFAULT_BLOCK_WINDOW: Duration = Duration::from_secs(60);

/// Change to one uplink's block deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadlineAction {
    /// Blocked without a deadline: quarantine until `at`.
    Arm(DateTime<Utc>),
    /// Deadline passed: these families move to unblocking.
    Expire(Vec<AddressFamily>),
    /// Deadline left on an uplink that is no longer blocked.
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlineUpdate {
    pub uplink: UplinkId,
    pub action: DeadlineAction,
}

/// Outcome of one arbitration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub deadline_updates: Vec<DeadlineUpdate>,
    pub winner: Option<UplinkId>,
    /// Earliest block deadline still outstanding.
    pub next_wakeup: Option<DateTime<Utc>>,
}

impl Plan {
    pub fn winner_changed(&self, current: Option<&UplinkId>) -> bool {
        self.winner.as_ref() != current
    }
}

/// Compute one arbitration pass.
///
/// `incumbent` is the uplink currently in use; it keeps winning as long as it
/// is a candidate and nothing beats its priority.
pub fn plan<'a, I>(
    records: I,
    incumbent: Option<&UplinkId>,
    now: DateTime<Utc>,
    block_window: Duration,
) -> Plan
where
    I: IntoIterator<Item = &'a UplinkRecord>,
{
    let window = chrono::Duration::from_std(block_window)
        .or_else(|_| chrono::Duration::from_std(DEFAULT_BLOCK_WINDOW))
        .unwrap_or_default();

    let mut out = Plan::default();
    let mut candidates: Vec<(UplinkId, i32)> = Vec::new();

    for record in records {
        // Same record as the engine will hold after this pass's deadline updates.
        let mut view = Cow::Borrowed(record);

        if record.is_blocked_any() {
            match record.unblock_deadline {
                None => {
                    let at = now + window;
                    out.deadline_updates.push(DeadlineUpdate {
                        uplink: record.id.clone(),
                        action: DeadlineAction::Arm(at),
                    });
                    out.next_wakeup = earliest(out.next_wakeup, at);
                }
                Some(at) if at <= now => {
                    let families: Vec<_> = record.blocked_families().collect();
                    for family in &families {
                        view.to_mut().set_state(*family, LinkState::Unblocking);
                    }
                    out.deadline_updates.push(DeadlineUpdate {
                        uplink: record.id.clone(),
                        action: DeadlineAction::Expire(families),
                    });
                }
                Some(at) => {
                    out.next_wakeup = earliest(out.next_wakeup, at);
                }
            }
        } else if record.unblock_deadline.is_some() {
            out.deadline_updates.push(DeadlineUpdate {
                uplink: record.id.clone(),
                action: DeadlineAction::Clear,
            });
        }

        if view.is_candidate() {
            candidates.push((record.id.clone(), record.priority));
        }
    }

    out.winner = select_winner(&candidates, incumbent);
    out
}

/// Pick the highest priority candidate.
///
/// The incumbent is kept on a tie. Ties between other candidates go to the
/// lowest interface name so repeated passes agree with each other.
pub fn select_winner(candidates: &[(UplinkId, i32)], incumbent: Option<&UplinkId>) -> Option<UplinkId> {
    let best = candidates.iter().map(|(_, p)| *p).max()?;

    if let Some(incumbent) = incumbent {
        if candidates.iter().any(|(id, p)| id == incumbent && *p == best) {
            return Some(incumbent.clone());
        }
    }

    candidates
        .iter()
        .filter(|(_, p)| *p == best)
        .map(|(id, _)| id)
        .min()
        .cloned()
}

fn earliest(current: Option<DateTime<Utc>>, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Some(current.map_or(at, |c| c.min(at)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InterfaceType;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn eth(name: &str, priority: i32) -> UplinkRecord {
        UplinkRecord::new(name, InterfaceType::Ethernet, priority)
            .with_link()
            .with_ipv4(LinkState::Active)
    }

    #[test]
    fn test_priority_wins_regardless_of_order() {
        let a = eth("a", 10);
        let b = eth("b", 20);

        let forward = plan([&a, &b], None, now(), DEFAULT_BLOCK_WINDOW);
        let backward = plan([&b, &a], None, now(), DEFAULT_BLOCK_WINDOW);
        assert_eq!(forward.winner, Some(UplinkId::from("b")));
        assert_eq!(backward.winner, Some(UplinkId::from("b")));
    }

    #[test]
    fn test_incumbent_keeps_tie() {
        let a = eth("zeta", 10);
        let b = eth("alpha", 10);
        let incumbent = UplinkId::from("zeta");

        let out = plan([&a, &b], Some(&incumbent), now(), DEFAULT_BLOCK_WINDOW);
        assert_eq!(out.winner, Some(incumbent));
        assert!(!out.winner_changed(Some(&UplinkId::from("zeta"))));
    }

    #[test]
    fn test_incumbent_displaced_by_higher_priority() {
        let a = eth("a", 10);
        let b = eth("b", 11);
        let incumbent = UplinkId::from("a");

        let out = plan([&a, &b], Some(&incumbent), now(), DEFAULT_BLOCK_WINDOW);
        assert_eq!(out.winner, Some(UplinkId::from("b")));
    }

    #[test]
    fn test_blocked_without_deadline_is_armed() {
        let a = eth("eth0", 11).with_ipv4(LinkState::Blocked);

        let out = plan([&a], None, now(), DEFAULT_BLOCK_WINDOW);
        let at = now() + chrono::Duration::seconds(60);
        assert_eq!(
            out.deadline_updates,
            vec![DeadlineUpdate {
                uplink: UplinkId::from("eth0"),
                action: DeadlineAction::Arm(at),
            }]
        );
        assert_eq!(out.next_wakeup, Some(at));
        assert_eq!(out.winner, None);
    }

    #[test]
    fn test_expired_deadline_unblocks_and_wins() {
        let a = eth("eth0", 11)
            .with_ipv4(LinkState::Blocked)
            .with_deadline(now() - chrono::Duration::seconds(1));

        let out = plan([&a], None, now(), DEFAULT_BLOCK_WINDOW);
        assert_eq!(
            out.deadline_updates[0].action,
            DeadlineAction::Expire(vec![AddressFamily::Ipv4])
        );
        assert_eq!(out.next_wakeup, None);
        assert_eq!(out.winner, Some(UplinkId::from("eth0")));
    }

    #[test]
    fn test_pending_deadline_sets_min_wakeup() {
        let soon = now() + chrono::Duration::seconds(10);
        let later = now() + chrono::Duration::seconds(40);
        let a = eth("eth0", 11).with_ipv4(LinkState::Blocked).with_deadline(later);
        let b = eth("eth1", 11).with_ipv6(LinkState::Blocked).with_deadline(soon);

        let out = plan([&a, &b], None, now(), DEFAULT_BLOCK_WINDOW);
        assert!(out.deadline_updates.is_empty());
        assert_eq!(out.next_wakeup, Some(soon));
        // eth1 is blocked on IPv6 only and still wins on IPv4.
        assert_eq!(out.winner, Some(UplinkId::from("eth1")));
    }

    #[test]
    fn test_no_address_is_never_candidate() {
        let a = UplinkRecord::new("eth0", InterfaceType::Ethernet, 11).with_link();
        let out = plan([&a], None, now(), DEFAULT_BLOCK_WINDOW);
        assert_eq!(out.winner, None);
    }

    #[test]
    fn test_needs_both_layers() {
        let mut a = eth("eth0", 11);
        a.has_l3 = false;
        let out = plan([&a], None, now(), DEFAULT_BLOCK_WINDOW);
        assert_eq!(out.winner, None);
    }

    #[test]
    fn test_stale_deadline_is_cleared() {
        let a = eth("eth0", 11).with_deadline(now());
        let out = plan([&a], None, now(), DEFAULT_BLOCK_WINDOW);
        assert_eq!(out.deadline_updates[0].action, DeadlineAction::Clear);
    }

    #[test]
    fn test_blocked_incumbent_is_not_kept() {
        let a = eth("eth0", 11)
            .with_ipv4(LinkState::Blocked)
            .with_deadline(now() + chrono::Duration::seconds(30));
        let incumbent = UplinkId::from("eth0");
        let out = plan([&a], Some(&incumbent), now(), DEFAULT_BLOCK_WINDOW);
        assert_eq!(out.winner, None);
        assert!(out.winner_changed(Some(&incumbent)));
    }
}
