//! The fixed-period control loop.
//!
//! One thread issues every address operation: probes fan out and are joined inside the round,
//! the throughput sample blocks the round, and the audit runs between rounds. Nothing here ever
//! mutates the interface concurrently.

use crate::config::FailoverConfig;
use crate::errors::{FailoverError, FailoverResult};
use crate::network::{AddressExecutor, CommandOutcome};
use crate::probe::{check_connectivity, ConnectivityProbe};
use crate::state_machine::{Decision, FailoverStateMachine};
use crate::switcher::AddressSwitcher;
use crate::throughput::ThroughputSampler;
use log::{error, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep between checks of the stop flag
const STOP_POLL: Duration = Duration::from_millis(100);

pub struct Controller<E, P, T> {
    config: FailoverConfig,
    probe: P,
    machine: FailoverStateMachine<E, T>,
    rounds: u64,
}

impl<E, P, T> Controller<E, P, T>
where
    E: AddressExecutor,
    P: ConnectivityProbe,
    T: ThroughputSampler,
{
    pub fn new(config: FailoverConfig, executor: E, probe: P, sampler: T) -> Self {
        let switcher = AddressSwitcher::new(executor, &config);
        let machine = FailoverStateMachine::new(switcher, sampler, &config, Instant::now());
        Self {
            config,
            probe,
            machine,
            rounds: 0,
        }
    }

    pub fn machine(&self) -> &FailoverStateMachine<E, T> {
        &self.machine
    }

    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Make sure the interface exists and is administratively up
    pub fn verify_interface(&self) -> FailoverResult<()> {
        let executor = self.machine.switcher().executor();
        let iface = &self.config.interface;

        let link = executor.show_link(iface);
        if !link.exists {
            error!("Interface {} does not exist", iface);
            return Err(FailoverError::InterfaceNotFound(iface.clone()));
        }

        if !link.admin_up {
            warn!("Interface {} is DOWN, bringing it up", iface);
            if let CommandOutcome::Failed(msg) = executor.set_link_up(iface) {
                error!("ip link set {} up failed: {}", iface, msg);
            }
            thread::sleep(self.config.link_up_settle);

            if !executor.show_link(iface).admin_up {
                error!("Could not bring interface {} up", iface);
                return Err(FailoverError::LinkDown(iface.clone()));
            }
        }

        info!("Interface {} is UP", iface);
        Ok(())
    }

    /// Verify the link, reconcile inherited addresses and enter `Primary`
    pub fn startup(&mut self) -> FailoverResult<()> {
        self.verify_interface()?;

        if !self.machine.switcher().reconcile_to_primary() {
            warn!("Startup reconciliation incomplete, the audit will keep correcting it");
        }
        self.machine.force_primary(Instant::now());

        info!("Monitoring started - state: {}", self.machine.state());
        info!(
            "Failover after {} failed rounds | recovery after {} healthy rounds",
            self.config.fail_rounds, self.config.up_rounds
        );
        info!("Anti-flapping: {:?} between switches", self.config.min_dwell);
        info!("Minimum throughput: {} Mbps", self.config.speed_threshold_mbps);
        info!("--------------------------------------------------------------------------------");
        Ok(())
    }

    /// One monitoring round: probe, audit if due, decide
    pub fn run_round(&mut self, now: Instant) -> FailoverResult<Decision> {
        let verdict = check_connectivity(
            &self.probe,
            &self.config.probe_targets,
            self.config.probe_timeout,
        )?;
        self.rounds += 1;

        let decision = self.machine.on_round(verdict.reachable, now);

        if self.rounds % self.config.status_every == 0 {
            info!(
                "Check #{} | Internet: {} ({}/{}) | Up: {} Fail: {} | State: {}",
                self.rounds,
                if verdict.reachable { "UP" } else { "DOWN" },
                verdict.ok_count,
                verdict.total,
                self.machine.consecutive_up(),
                self.machine.consecutive_fail(),
                self.machine.state()
            );
        }

        self.machine.audit_if_due(now);

        Ok(decision)
    }

    /// Loop until `stop` is raised, then leave the primary address installed.
    ///
    /// An error or a panic from a round ends the loop after the same best-effort restoration;
    /// the panic is then resumed.
    pub fn run(&mut self, stop: &AtomicBool) -> FailoverResult<()> {
        while !stop.load(Ordering::SeqCst) {
            let round = panic::catch_unwind(AssertUnwindSafe(|| self.run_round(Instant::now())));
            match round {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    error!("UNHANDLED ERROR: {}", e);
                    warn!("Trying to leave the primary address active...");
                    self.restore_primary();
                    return Err(e);
                }
                Err(payload) => {
                    error!("UNHANDLED PANIC in monitoring round");
                    warn!("Trying to leave the primary address active...");
                    self.restore_primary();
                    panic::resume_unwind(payload);
                }
            }
            sleep_unless_stopped(self.config.check_period, stop);
        }

        warn!("==================================================");
        warn!("INTERRUPTED, restoring the primary address");
        self.restore_primary();
        warn!("Controller stopped");
        warn!("==================================================");
        Ok(())
    }

    /// Best-effort convergence to the primary address
    pub fn restore_primary(&self) -> bool {
        self.machine.switcher().reconcile_to_primary()
    }
}

fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + total;
    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(STOP_POLL));
    }
}
