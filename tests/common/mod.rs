//! In-memory interface and scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use ip_failover::{
    AddOutcome, AddressExecutor, CommandOutcome, ConnectivityProbe, DeleteOutcome, FailoverConfig,
    FailoverError, FailoverResult, LinkStatus, ThroughputSampler,
};
use std::cell::{Cell, RefCell};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub const PRIMARY: &str = "192.168.7.1/24";
pub const SECONDARY: &str = "192.168.7.254/24";

/// Defaults with every settle delay removed
pub fn fast_config() -> FailoverConfig {
    let mut config = FailoverConfig::new("lan0", PRIMARY, SECONDARY).unwrap();
    config.delay_after_delete = Duration::ZERO;
    config.delay_after_add = Duration::ZERO;
    config.delay_before_verify = Duration::ZERO;
    config.retry_delay = Duration::ZERO;
    config.link_up_settle = Duration::ZERO;
    config.probe_targets = vec!["A".into(), "B".into(), "C".into(), "D".into()];
    config
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub addresses: Vec<String>,
    pub link: LinkStatus,
    /// Every call, in order, e.g. `add 192.168.7.1/24`
    pub ops: Vec<String>,
    /// Next N deletes fail outright
    pub failing_deletes: u32,
    /// Next N deletes report success but leave the address bound
    pub sticky_deletes: u32,
    /// Next N adds fail outright
    pub failing_adds: u32,
    /// Next N adds report success without binding anything
    pub phantom_adds: u32,
    pub failing_flushes: bool,
    /// Next N list calls fail
    pub failing_lists: u32,
    /// List calls made so far
    pub list_calls: u32,
    /// 1-based list call numbers that fail
    pub failing_list_calls: Vec<u32>,
    /// Link comes up when asked
    pub link_up_works: bool,
    /// Mutations after which both managed addresses were bound
    pub overlap_violations: u32,
}

/// An interface whose addresses live in memory
pub struct FakeInterface {
    pub state: RefCell<FakeState>,
}

impl FakeInterface {
    pub fn with_addresses(addresses: &[&str]) -> Self {
        Self {
            state: RefCell::new(FakeState {
                addresses: addresses.iter().map(|s| s.to_string()).collect(),
                link: LinkStatus {
                    exists: true,
                    admin_up: true,
                },
                link_up_works: true,
                ..Default::default()
            }),
        }
    }

    pub fn addresses(&self) -> Vec<String> {
        self.state.borrow().addresses.clone()
    }

    pub fn has(&self, cidr: &str) -> bool {
        self.state.borrow().addresses.iter().any(|a| a == cidr)
    }

    pub fn ops(&self) -> Vec<String> {
        self.state.borrow().ops.clone()
    }

    pub fn mutations(&self) -> Vec<String> {
        self.ops().into_iter().filter(|op| !op.starts_with("list")).collect()
    }

    pub fn violations(&self) -> u32 {
        self.state.borrow().overlap_violations
    }

    pub fn set(&self, f: impl FnOnce(&mut FakeState)) {
        f(&mut self.state.borrow_mut());
    }

    fn record_overlap(state: &mut FakeState) {
        let both = state.addresses.iter().any(|a| a == PRIMARY)
            && state.addresses.iter().any(|a| a == SECONDARY);
        if both {
            state.overlap_violations += 1;
        }
    }
}

impl AddressExecutor for FakeInterface {
    fn list_addresses(&self, _iface: &str) -> FailoverResult<Vec<String>> {
        let mut state = self.state.borrow_mut();
        state.ops.push("list".to_string());
        state.list_calls += 1;
        let call = state.list_calls;
        if state.failing_list_calls.contains(&call) {
            return Err(FailoverError::CommandExecution("list failed".to_string()));
        }
        if state.failing_lists > 0 {
            state.failing_lists -= 1;
            return Err(FailoverError::CommandExecution("list failed".to_string()));
        }
        Ok(state.addresses.clone())
    }

    fn add_address(&self, _iface: &str, cidr: &str) -> AddOutcome {
        let mut state = self.state.borrow_mut();
        state.ops.push(format!("add {}", cidr));
        if state.failing_adds > 0 {
            state.failing_adds -= 1;
            return AddOutcome::Failed("RTNETLINK answers: No buffer space available".to_string());
        }
        if state.phantom_adds > 0 {
            state.phantom_adds -= 1;
            return AddOutcome::Applied;
        }
        if state.addresses.iter().any(|a| a == cidr) {
            return AddOutcome::AlreadyExists;
        }
        state.addresses.push(cidr.to_string());
        Self::record_overlap(&mut state);
        AddOutcome::Applied
    }

    fn delete_address(&self, _iface: &str, cidr: &str) -> DeleteOutcome {
        let mut state = self.state.borrow_mut();
        state.ops.push(format!("del {}", cidr));
        if state.failing_deletes > 0 {
            state.failing_deletes -= 1;
            return DeleteOutcome::Failed("RTNETLINK answers: Operation not permitted".to_string());
        }
        if state.sticky_deletes > 0 {
            state.sticky_deletes -= 1;
            return DeleteOutcome::Applied;
        }
        let before = state.addresses.len();
        state.addresses.retain(|a| a != cidr);
        if state.addresses.len() == before {
            DeleteOutcome::NotFound
        } else {
            DeleteOutcome::Applied
        }
    }

    fn flush_addresses(&self, _iface: &str) -> CommandOutcome {
        let mut state = self.state.borrow_mut();
        state.ops.push("flush".to_string());
        if state.failing_flushes {
            return CommandOutcome::Failed("flush refused".to_string());
        }
        state.addresses.clear();
        CommandOutcome::Applied
    }

    fn show_link(&self, _iface: &str) -> LinkStatus {
        let mut state = self.state.borrow_mut();
        state.ops.push("show link".to_string());
        state.link
    }

    fn set_link_up(&self, _iface: &str) -> CommandOutcome {
        let mut state = self.state.borrow_mut();
        state.ops.push("link up".to_string());
        if state.link_up_works {
            state.link.admin_up = true;
            CommandOutcome::Applied
        } else {
            CommandOutcome::Failed("Operation not permitted".to_string())
        }
    }

    fn announce_address(&self, _iface: &str, ip: IpAddr) -> CommandOutcome {
        self.state.borrow_mut().ops.push(format!("announce {}", ip));
        CommandOutcome::Applied
    }
}

/// Probe whose answer for every target is flipped from the test
pub struct SwitchProbe {
    pub up: AtomicBool,
}

impl SwitchProbe {
    pub fn new(up: bool) -> Self {
        Self {
            up: AtomicBool::new(up),
        }
    }

    pub fn set(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }
}

impl ConnectivityProbe for SwitchProbe {
    fn probe(&self, _target: &str, _timeout: Duration) -> bool {
        self.up.load(Ordering::SeqCst)
    }
}

/// Sampler returning a fixed reading and counting calls
pub struct FixedSampler {
    pub reading: Cell<Option<f64>>,
    pub calls: Cell<u32>,
}

impl FixedSampler {
    pub fn new(reading: Option<f64>) -> Self {
        Self {
            reading: Cell::new(reading),
            calls: Cell::new(0),
        }
    }
}

impl ThroughputSampler for FixedSampler {
    fn measure(&self) -> Option<f64> {
        self.calls.set(self.calls.get() + 1);
        self.reading.get()
    }
}
