//! # IP Failover
//!
//! A single-interface IP failover controller. The monitored link carries exactly one of two
//! mutually-exclusive addresses, a primary and a secondary, and the controller moves between
//! them based on upstream reachability.
//!
//! Failures are debounced over consecutive rounds, corroborated by an interface throughput
//! sample before acting, and applied with a delete-before-add protocol so the interface never
//! holds both addresses at once. A periodic audit repairs any drift in the live address set.

pub mod address;
pub mod config;
pub mod controller;
pub mod errors;
pub mod network;
pub mod probe;
pub mod sanity;
pub mod state_machine;
pub mod switcher;
pub mod throughput;

// Re-export commonly used types and functions
pub use address::{AddressPair, InterfaceAddress, LiveAddressSet};
pub use config::{CliOverrides, FailoverConfig, FileConfig};
pub use controller::Controller;
pub use errors::{FailoverError, FailoverResult};
pub use network::{
    AddOutcome,
    AddressExecutor,
    CommandOutcome,
    DeleteOutcome,
    IpCommandExecutor,
    LinkStatus,
};
pub use probe::{check_connectivity, majority_reachable, ConnectivityProbe, PingProbe, RoundVerdict};
pub use sanity::{SanityAction, SanityMonitor};
pub use state_machine::{Decision, FailoverStateMachine};
pub use switcher::AddressSwitcher;
pub use throughput::{bitrate_mbps, SysfsTxCounter, ThroughputSampler, TxByteCounter, TxRateSampler};

/// Which of the two address assignments is under discussion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The preferred address, installed whenever upstream is reachable
    Primary,

    /// The fallback address, installed while upstream is down
    Secondary,
}

impl Role {
    /// The other role of the pair
    pub fn opposite(self) -> Role {
        match self {
            Role::Primary => Role::Secondary,
            Role::Secondary => Role::Primary,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Primary => write!(f, "PRIMARY"),
            Role::Secondary => write!(f, "SECONDARY"),
        }
    }
}

/// The controller's belief about which role is authoritative
pub type HealthState = Role;
