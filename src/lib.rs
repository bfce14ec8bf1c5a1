//! # gatelink
//!
//! Uplink arbitration and link-lifecycle engine for home and SMB gateways.
//!
//! A gateway may have several candidate uplinks (wired Ethernet, a WiFi
//! station link tunneled over GRE, LTE, PPPoE, VLAN sub-interfaces). gatelink
//! decides which single uplink carries traffic, quarantines flaky links for a
//! block window, and keeps bridge membership, DHCP client state and GRE
//! tunnels consistent with that decision.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Shared table store (LinkStore)                 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │      StoreEvent stream  ──►  EngineHandle  ──►  engine loop     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                              Engine                             │
//! │  ┌──────────┐  ┌──────────┐  ┌─────────────┐  ┌────────────┐    │
//! │  │ Registry │  │ Counters │  │ Arbitration │  │ Transition │    │
//! │  └──────────┘  └──────────┘  └─────────────┘  └────────────┘    │
//! │  ┌──────────┐  ┌──────────┐  ┌─────────────┐  ┌────────────┐    │
//! │  │  Timers  │  │   DHCP   │  │   Bridges   │  │ VLAN tags  │    │
//! │  └──────────┘  └──────────┘  └─────────────┘  └────────────┘    │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                     Uplink outage event log                     │
//! └─────────────────────────────────────────────────────────────────┘

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]      // Many functions can't be const due to trait bounds
#![allow(clippy::doc_markdown)]              // ASCII diagrams in docs
#![allow(clippy::cast_possible_truncation)]  // Test TLV lengths fit in a byte
#![allow(clippy::option_if_let_else)]        // More readable in context
#![allow(clippy::use_self)]                  // Explicit type names in matches
#![allow(clippy::redundant_pub_crate)]       // Explicit visibility
#![allow(clippy::cognitive_complexity)]      // Complex state machines
#![allow(clippy::too_many_lines)]            // Complete implementations
#![allow(clippy::struct_excessive_bools)]    // Row types mirror store columns
#![allow(clippy::match_same_arms)]           // Explicit arm per variant is clearer
#![allow(clippy::return_self_not_must_use)]  // Builder methods don't need must_use

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod store;
pub mod types;
pub mod uplink;

#[cfg(feature = "cli")]
pub mod cli;

pub use config::Config;
pub use engine::{Engine, EngineConfig, EngineEvent, EngineHandle};
pub use error::{Error, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::Config;
    pub use crate::engine::{Engine, EngineConfig, EngineEvent, EngineHandle, GlobalLinkState};
    pub use crate::error::{Error, Result};
    pub use crate::events::{EventKind, UplinkEventLog};
    pub use crate::store::{
        Collaborators, LinkStore, ManagerControl, MemoryStore, OnboardingNotifier, RowChange,
        StoreEvent,
    };
    pub use crate::types::*;
    pub use crate::uplink::{UplinkRecord, UplinkRegistry};
}
