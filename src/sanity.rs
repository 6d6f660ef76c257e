//! Periodic audit of the live address set against the believed state.

use crate::network::AddressExecutor;
use crate::switcher::AddressSwitcher;
use crate::{HealthState, Role};
use log::{debug, error, info, warn};
use std::time::{Duration, Instant};

/// What an enforcement pass found and did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanityAction {
    /// Only the expected address was present
    Consistent,
    /// Both addresses were present; the given role was deleted
    RemovedConflicting(Role),
    /// Neither address was present; the given role was added back
    RestoredMissing(Role),
    /// Only the wrong address was present; a full switch toward the given role was run
    Transitioned(Role),
    /// The address set could not be read
    Unreadable,
}

/// Drift detector running on its own, slower period
#[derive(Debug, Clone)]
pub struct SanityMonitor {
    period: Duration,
    last_run: Instant,
}

impl SanityMonitor {
    pub fn new(period: Duration, now: Instant) -> Self {
        Self {
            period,
            last_run: now,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_run) > self.period
    }

    /// Run [`enforce`](Self::enforce) if the audit period has elapsed
    pub fn run_if_due<E: AddressExecutor>(
        &mut self,
        switcher: &AddressSwitcher<E>,
        expected: HealthState,
        now: Instant,
    ) -> Option<SanityAction> {
        if !self.is_due(now) {
            return None;
        }
        Some(self.run_now(switcher, expected, now))
    }

    /// Enforce immediately and restart the audit period from `now`
    pub fn run_now<E: AddressExecutor>(
        &mut self,
        switcher: &AddressSwitcher<E>,
        expected: HealthState,
        now: Instant,
    ) -> SanityAction {
        self.last_run = now;
        self.enforce(switcher, expected)
    }

    /// Make the interface carry exactly the address of `expected`
    pub fn enforce<E: AddressExecutor>(
        &self,
        switcher: &AddressSwitcher<E>,
        expected: HealthState,
    ) -> SanityAction {
        let Some(live) = switcher.query() else {
            error!("Sanity check skipped: address set unreadable");
            return SanityAction::Unreadable;
        };

        let wanted = switcher.addresses().get(expected);
        let unwanted = switcher.addresses().get(expected.opposite());
        let has_wanted = live.contains(wanted);
        let has_unwanted = live.contains(unwanted);

        debug!(
            "Sanity check - state: {}, {}={}, {}={}",
            expected, wanted, has_wanted, unwanted, has_unwanted
        );

        match (has_wanted, has_unwanted) {
            (true, true) => {
                error!("ALERT! Both addresses present in {} state, removing {}", expected, unwanted);
                if !switcher.delete_verified(unwanted, &live) {
                    error!("Could not remove {}, will retry on the next audit", unwanted);
                }
                SanityAction::RemovedConflicting(unwanted.role())
            }
            (false, false) => {
                error!("EMERGENCY! No managed address on {}", switcher.interface());
                warn!("Restoring {} address {}", expected, wanted);
                if !switcher.add_with_retry(wanted) {
                    error!("Could not restore {}", wanted);
                }
                SanityAction::RestoredMissing(expected)
            }
            (false, true) => {
                warn!("State {} but {} is installed, correcting", expected, unwanted);
                switcher.transition(unwanted.role(), expected);
                SanityAction::Transitioned(expected)
            }
            (true, false) => {
                info!("Sanity check OK: {} holds {}", switcher.interface(), wanted);
                SanityAction::Consistent
            }
        }
    }
}
