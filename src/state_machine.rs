//! Failover state machine.
//!
//! Implements the two transitions between address roles:
//! - Primary → Secondary (after `fail_rounds` failed rounds, confirmed by low throughput)
//! - Secondary → Primary (after `up_rounds` healthy rounds)
//!
//! Both are gated by the minimum dwell time since the last completed transition.

use crate::config::FailoverConfig;
use crate::network::AddressExecutor;
use crate::sanity::{SanityAction, SanityMonitor};
use crate::switcher::AddressSwitcher;
use crate::throughput::ThroughputSampler;
use crate::{HealthState, Role};
use log::{error, info, warn};
use std::time::{Duration, Instant};

/// What a round of the state machine decided
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Thresholds not reached
    Hold,
    /// A threshold was reached but the last transition is too recent
    DwellBlocked { remaining: Duration },
    /// Probes failed but the interface is still moving traffic
    FalsePositive { mbps: f64 },
    Switched { from: Role, to: Role },
    /// The switch failed; the interface was re-checked against the retained state, which also
    /// counts as this period's audit
    SwitchFailed {
        from: Role,
        to: Role,
        enforcement: SanityAction,
    },
}

/// Debounced, dwell-gated failover decisions driving an [`AddressSwitcher`]
pub struct FailoverStateMachine<E, T> {
    switcher: AddressSwitcher<E>,
    sampler: T,
    sanity: SanityMonitor,
    state: HealthState,
    consecutive_fail: u32,
    consecutive_up: u32,
    last_switch: Instant,
    /// Throughput already confirmed the outage for the current crossing
    outage_confirmed: bool,
    fail_rounds: u32,
    up_rounds: u32,
    min_dwell: Duration,
    speed_threshold_mbps: f64,
}

impl<E: AddressExecutor, T: ThroughputSampler> FailoverStateMachine<E, T> {
    /// Start in `Primary`, treating `now` as the last (forced) transition
    pub fn new(switcher: AddressSwitcher<E>, sampler: T, config: &FailoverConfig, now: Instant) -> Self {
        Self {
            switcher,
            sampler,
            sanity: SanityMonitor::new(config.sanity_period, now),
            state: Role::Primary,
            consecutive_fail: 0,
            consecutive_up: 0,
            last_switch: now,
            outage_confirmed: false,
            fail_rounds: config.fail_rounds,
            up_rounds: config.up_rounds,
            min_dwell: config.min_dwell,
            speed_threshold_mbps: config.speed_threshold_mbps,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn consecutive_fail(&self) -> u32 {
        self.consecutive_fail
    }

    pub fn consecutive_up(&self) -> u32 {
        self.consecutive_up
    }

    pub fn last_switch(&self) -> Instant {
        self.last_switch
    }

    pub fn switcher(&self) -> &AddressSwitcher<E> {
        &self.switcher
    }

    /// Record the startup reconciliation as a forced transition to `Primary`
    pub fn force_primary(&mut self, now: Instant) {
        self.state = Role::Primary;
        self.reset_after_transition(now);
    }

    /// Feed one round's connectivity verdict
    pub fn on_round(&mut self, reachable: bool, now: Instant) -> Decision {
        if reachable {
            self.consecutive_up = self.consecutive_up.saturating_add(1);
            self.consecutive_fail = 0;
            self.outage_confirmed = false;
        } else {
            self.consecutive_fail = self.consecutive_fail.saturating_add(1);
            self.consecutive_up = 0;
        }

        match self.state {
            Role::Primary => {
                if self.consecutive_fail < self.fail_rounds {
                    return Decision::Hold;
                }
                if let Some(remaining) = self.dwell_remaining(now) {
                    return Decision::DwellBlocked { remaining };
                }

                if !self.outage_confirmed {
                    warn!("============================================================");
                    warn!(
                        "POSSIBLE OUTAGE: probes failing for {} consecutive rounds",
                        self.consecutive_fail
                    );
                    if let Some(mbps) = self.confirm_outage() {
                        warn!("============================================================");
                        return Decision::FalsePositive { mbps };
                    }
                    self.outage_confirmed = true;
                }

                warn!("Proceeding with switch to the secondary address");
                let decision = self.attempt(Role::Secondary, now);
                warn!("============================================================");
                decision
            }
            Role::Secondary => {
                if self.consecutive_up < self.up_rounds {
                    return Decision::Hold;
                }
                if let Some(remaining) = self.dwell_remaining(now) {
                    return Decision::DwellBlocked { remaining };
                }

                warn!(
                    "Upstream OK for {} consecutive rounds, restoring the primary address",
                    self.consecutive_up
                );
                self.attempt(Role::Primary, now)
            }
        }
    }

    /// Run the periodic address audit against the current state if it is due
    pub fn audit_if_due(&mut self, now: Instant) -> Option<SanityAction> {
        self.sanity.run_if_due(&self.switcher, self.state, now)
    }

    fn dwell_remaining(&self, now: Instant) -> Option<Duration> {
        let elapsed = now.saturating_duration_since(self.last_switch);
        if elapsed >= self.min_dwell {
            None
        } else {
            Some(self.min_dwell - elapsed)
        }
    }

    /// Double validation: returns the measured rate when it disproves the outage
    fn confirm_outage(&mut self) -> Option<f64> {
        warn!("Checking interface throughput...");
        match self.sampler.measure() {
            None => {
                error!("Could not measure throughput, assuming a real outage");
                None
            }
            Some(mbps) if mbps < self.speed_threshold_mbps => {
                warn!(
                    "LOW THROUGHPUT: {:.2} Mbps < {} Mbps, outage confirmed",
                    mbps, self.speed_threshold_mbps
                );
                None
            }
            Some(mbps) => {
                info!(
                    "Throughput OK: {:.2} Mbps >= {} Mbps",
                    mbps, self.speed_threshold_mbps
                );
                warn!("FALSE POSITIVE: probes fail but traffic is flowing, address unchanged");
                self.consecutive_fail = 0;
                Some(mbps)
            }
        }
    }

    fn attempt(&mut self, to: Role, now: Instant) -> Decision {
        let from = self.state;
        if self.switcher.transition(from, to) {
            self.state = to;
            self.reset_after_transition(now);
            warn!("Transition {} -> {} completed", from, to);
            return Decision::Switched { from, to };
        }

        error!("Transition {} -> {} FAILED, keeping {}", from, to, from);
        let enforcement = self.sanity.run_now(&self.switcher, from, now);
        Decision::SwitchFailed {
            from,
            to,
            enforcement,
        }
    }

    fn reset_after_transition(&mut self, now: Instant) {
        self.last_switch = now;
        self.consecutive_fail = 0;
        self.consecutive_up = 0;
        self.outage_confirmed = false;
    }
}
