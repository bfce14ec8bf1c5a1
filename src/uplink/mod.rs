//! Uplink records, the registry that holds them, and reachability counters.

mod counters;
mod record;
mod registry;

pub use counters::{FailureOutcome, ReachabilityTracker};
pub use record::{parse_deadline, DefaultPriorities, ReachabilityCounters, UplinkRecord};
pub use registry::UplinkRegistry;
