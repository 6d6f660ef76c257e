//! Delete-before-add address transitions.
//!
//! The interface must never carry the primary and the secondary address at the same time, so
//! every transition removes the old address and confirms it is gone before the new one is added.
//! Each mutation is followed by a settle delay and a fresh read of the live address set; the
//! executor's reported outcome alone is never trusted.

use crate::address::{AddressPair, InterfaceAddress, LiveAddressSet};
use crate::config::FailoverConfig;
use crate::network::{AddOutcome, AddressExecutor, CommandOutcome, DeleteOutcome};
use crate::Role;
use log::{debug, error, info, warn};
use std::thread;
use std::time::Duration;

/// Performs verified address mutations on one interface
pub struct AddressSwitcher<E> {
    executor: E,
    interface: String,
    addresses: AddressPair,
    delay_after_delete: Duration,
    delay_after_add: Duration,
    delay_before_verify: Duration,
    retry_delay: Duration,
}

impl<E: AddressExecutor> AddressSwitcher<E> {
    pub fn new(executor: E, config: &FailoverConfig) -> Self {
        Self {
            executor,
            interface: config.interface.clone(),
            addresses: config.addresses.clone(),
            delay_after_delete: config.delay_after_delete,
            delay_after_add: config.delay_after_add,
            delay_before_verify: config.delay_before_verify,
            retry_delay: config.retry_delay,
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn addresses(&self) -> &AddressPair {
        &self.addresses
    }

    /// Fresh read of the interface's addresses; `None` if they could not be listed
    pub fn query(&self) -> Option<LiveAddressSet> {
        match self.executor.list_addresses(&self.interface) {
            Ok(entries) => {
                let live = LiveAddressSet::new(entries);
                debug!("Addresses detected on {}: {}", self.interface, live);
                Some(live)
            }
            Err(e) => {
                error!("Cannot list addresses on {}: {}", self.interface, e);
                None
            }
        }
    }

    /// Move the interface from `from`'s address to `to`'s address.
    ///
    /// Returns `true` only when the final read shows `to` present and `from` absent.
    pub fn transition(&self, from: Role, to: Role) -> bool {
        let from_addr = self.addresses.get(from);
        let to_addr = self.addresses.get(to);

        warn!("======================================================================");
        warn!("SAFE SWITCH: {} ({}) -> {} ({})", from, from_addr, to, to_addr);
        warn!("======================================================================");

        let success = self.run_transition(from_addr, to_addr);

        warn!("======================================================================");
        success
    }

    fn run_transition(&self, from_addr: &InterfaceAddress, to_addr: &InterfaceAddress) -> bool {
        let Some(initial) = self.query() else {
            error!("Cannot read the address set, aborting switch to {}", to_addr.role());
            return false;
        };

        let mut has_from = initial.contains(from_addr);
        let mut has_to = initial.contains(to_addr);
        info!(
            "Initial state: {} ({}={}, {}={})",
            initial,
            from_addr.role(),
            has_from,
            to_addr.role(),
            has_to
        );

        if has_to && !has_from {
            warn!("Already in {} state, nothing to do", to_addr.role());
            return true;
        }

        if has_from && has_to {
            warn!("Both addresses present, removing {} before anything else", from_addr);
        }

        // Removal could not be confirmed; the add is skipped and the final read decides
        let mut removal_unverified = false;

        if has_from {
            info!("STEP 1: removing {} address {} first", from_addr.role(), from_addr);
            if self.delete_verified(from_addr, &initial) {
                thread::sleep(self.delay_before_verify);
                match self.query() {
                    Some(live) => has_from = live.contains(from_addr),
                    None => removal_unverified = true,
                }
            } else {
                warn!("Normal delete failed, falling back to flush");
                self.flush();
                match self.query() {
                    Some(live) => {
                        has_from = live.contains(from_addr);
                        has_to = live.contains(to_addr);
                    }
                    None => removal_unverified = true,
                }
            }
        }

        if removal_unverified {
            error!("Cannot confirm removal of {}, not adding {}", from_addr, to_addr);
        } else if has_from {
            error!("Could not remove {}, aborting switch", from_addr);
            return false;
        } else if !has_to {
            info!("STEP 2: adding {} address {}", to_addr.role(), to_addr);
            if !self.add_with_retry(to_addr) {
                error!("Could not add {}", to_addr);
            }
        }

        thread::sleep(self.delay_before_verify);
        let Some(final_set) = self.query() else {
            error!("Cannot read the address set, switch to {} unverified", to_addr.role());
            return false;
        };

        let has_from_final = final_set.contains(from_addr);
        let has_to_final = final_set.contains(to_addr);
        info!(
            "Final state: {} ({}={}, {}={})",
            final_set,
            from_addr.role(),
            has_from_final,
            to_addr.role(),
            has_to_final
        );

        let success = has_to_final && !has_from_final;
        if success {
            warn!("Switch to {} ({}) succeeded", to_addr.role(), to_addr);
            self.announce(to_addr);
        } else {
            error!("Switch to {} ({}) FAILED", to_addr.role(), to_addr);
            if !has_to_final && !has_from_final {
                error!("NO ADDRESS on {}! Emergency add of {}", self.interface, to_addr);
                self.emergency_add(to_addr);
            }
        }

        success
    }

    /// Delete an address and confirm it is gone.
    ///
    /// The exact entry bound in `live` is deleted, so an address carrying a different prefix
    /// length than configured is still removed.
    pub fn delete_verified(&self, addr: &InterfaceAddress, live: &LiveAddressSet) -> bool {
        let bound = live
            .entries()
            .iter()
            .find(|entry| addr.matches(entry))
            .map(String::as_str)
            .unwrap_or(addr.cidr());

        info!("Deleting {} from {}", bound, self.interface);
        match self.executor.delete_address(&self.interface, bound) {
            DeleteOutcome::Applied => {}
            DeleteOutcome::NotFound => debug!("{} was not bound", bound),
            DeleteOutcome::Failed(msg) => {
                error!("Delete of {} failed: {}", bound, msg);
                return false;
            }
        }

        thread::sleep(self.delay_after_delete);
        match self.query() {
            Some(after) if !after.contains(addr) => {
                info!("{} removed", addr);
                true
            }
            Some(_) => {
                warn!("{} still present after delete", addr);
                false
            }
            None => false,
        }
    }

    /// Add an address and confirm it shows up
    pub fn add_verified(&self, addr: &InterfaceAddress) -> bool {
        info!("Adding {} to {}", addr, self.interface);
        match self.executor.add_address(&self.interface, addr.cidr()) {
            AddOutcome::Applied => {}
            AddOutcome::AlreadyExists => {
                warn!("Kernel reports {} already exists", addr);
                return true;
            }
            AddOutcome::Failed(msg) => {
                error!("Add of {} failed: {}", addr, msg);
                return false;
            }
        }

        thread::sleep(self.delay_after_add);
        match self.query() {
            Some(after) if after.contains(addr) => {
                info!("{} added", addr);
                true
            }
            Some(_) => {
                error!("{} missing after add", addr);
                false
            }
            None => false,
        }
    }

    /// [`add_verified`](Self::add_verified), retried once after the retry delay
    pub fn add_with_retry(&self, addr: &InterfaceAddress) -> bool {
        if self.add_verified(addr) {
            return true;
        }
        warn!("Retrying add of {} in {:?}", addr, self.retry_delay);
        thread::sleep(self.retry_delay);
        self.add_verified(addr)
    }

    /// Remove every address from the interface
    pub fn flush(&self) -> bool {
        warn!("FLUSH: removing ALL addresses from {}", self.interface);
        let outcome = self.executor.flush_addresses(&self.interface);
        thread::sleep(self.delay_after_delete);
        match outcome {
            CommandOutcome::Applied => true,
            CommandOutcome::Unsupported => {
                error!("Flush is not supported by this executor");
                false
            }
            CommandOutcome::Failed(msg) => {
                error!("Flush of {} failed: {}", self.interface, msg);
                false
            }
        }
    }

    fn emergency_add(&self, addr: &InterfaceAddress) {
        match self.executor.add_address(&self.interface, addr.cidr()) {
            AddOutcome::Applied | AddOutcome::AlreadyExists => warn!("Emergency add of {} issued", addr),
            AddOutcome::Failed(msg) => error!("Emergency add of {} failed: {}", addr, msg),
        }
        thread::sleep(self.delay_after_add);
    }

    fn announce(&self, addr: &InterfaceAddress) {
        match self.executor.announce_address(&self.interface, addr.ip()) {
            CommandOutcome::Applied => info!("Gratuitous ARP sent for {}", addr.ip()),
            CommandOutcome::Unsupported => debug!("Address announcement unavailable"),
            CommandOutcome::Failed(msg) => debug!("Gratuitous ARP failed (not critical): {}", msg),
        }
    }

    /// Bring the interface to "primary only", whatever it currently carries.
    ///
    /// Used at startup to absorb inherited configuration, and on shutdown. Returns whether the
    /// final read shows exactly the primary address of the pair.
    pub fn reconcile_to_primary(&self) -> bool {
        let primary = &self.addresses.primary;
        let secondary = &self.addresses.secondary;

        info!("Reconciling {} to {}", self.interface, primary);
        let Some(live) = self.query() else {
            error!("Cannot read the address set, reconciliation skipped");
            return false;
        };
        info!("Addresses found: {}", live);

        match (live.contains(primary), live.contains(secondary)) {
            (true, true) => {
                warn!("Both addresses present, clearing everything");
                self.flush();
                thread::sleep(self.retry_delay);
                info!("Re-adding primary address");
                self.add_with_retry(primary);
            }
            (false, true) => {
                info!("Only {} present, switching to {}", secondary, primary);
                self.transition(Role::Secondary, Role::Primary);
            }
            (false, false) => {
                info!("No managed address present, adding {}", primary);
                self.add_with_retry(primary);
            }
            (true, false) => info!("Initial state correct ({} present)", primary),
        }

        thread::sleep(self.delay_before_verify);
        match self.query() {
            Some(final_set) => {
                info!("Initial state established: {}", final_set);
                final_set.contains(primary) && !final_set.contains(secondary)
            }
            None => false,
        }
    }
}
