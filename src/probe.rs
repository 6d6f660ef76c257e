//! Reachability probes and the per-round majority verdict.

use crate::errors::{FailoverError, FailoverResult};
use crate::network::run_command;
use log::debug;
use std::thread;
use std::time::Duration;

/// Grace period on top of the ping deadline before the process is killed
const PING_KILL_GRACE: Duration = Duration::from_secs(1);

/// A single reachability check against one target host.
///
/// Implementations never fail: timeouts and transport errors are reported as unreachable.
pub trait ConnectivityProbe: Sync {
    fn probe(&self, target: &str, timeout: Duration) -> bool;
}

impl<P: ConnectivityProbe + ?Sized> ConnectivityProbe for &P {
    fn probe(&self, target: &str, timeout: Duration) -> bool {
        (**self).probe(target, timeout)
    }
}

/// Probe that sends one ICMP echo with the system `ping`.
///
/// `ping -W` takes whole seconds, so the timeout is truncated to seconds (at least one).
#[derive(Debug, Clone, Copy, Default)]
pub struct PingProbe;

impl ConnectivityProbe for PingProbe {
    fn probe(&self, target: &str, timeout: Duration) -> bool {
        let wait = timeout.as_secs().max(1).to_string();
        match run_command("ping", &["-c", "1", "-W", &wait, target], timeout + PING_KILL_GRACE) {
            Ok(out) => out.success,
            Err(e) => {
                debug!("Ping {} failed: {}", target, e);
                false
            }
        }
    }
}

/// Outcome of one connectivity round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundVerdict {
    pub reachable: bool,
    pub ok_count: usize,
    pub total: usize,
    /// Per-target result, in configuration order
    pub results: Vec<(String, bool)>,
}

impl RoundVerdict {
    pub fn from_results(results: Vec<(String, bool)>) -> Self {
        let ok_count = results.iter().filter(|(_, ok)| *ok).count();
        let total = results.len();
        Self {
            reachable: majority_reachable(ok_count, total),
            ok_count,
            total,
            results,
        }
    }

    /// Compact per-target summary for the audit log, e.g. `8.8.8.8:ok 1.1.1.1:FAIL`
    pub fn summary(&self) -> String {
        self.results
            .iter()
            .map(|(target, ok)| format!("{}:{}", target, if *ok { "ok" } else { "FAIL" }))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Strict majority: more than half of the targets answered. A tie counts as down.
pub fn majority_reachable(ok_count: usize, total: usize) -> bool {
    ok_count * 2 > total
}

/// Probe every target concurrently and join all of them into one verdict
pub fn check_connectivity<P: ConnectivityProbe + ?Sized>(
    probe: &P,
    targets: &[String],
    timeout: Duration,
) -> FailoverResult<RoundVerdict> {
    let results = thread::scope(|scope| -> FailoverResult<Vec<(String, bool)>> {
        let mut handles = Vec::with_capacity(targets.len());
        for target in targets {
            let handle = thread::Builder::new()
                .name(format!("probe-{}", target))
                .spawn_scoped(scope, move || probe.probe(target, timeout))
                .map_err(|e| FailoverError::Probe(format!("spawning probe for {}: {}", target, e)))?;
            handles.push((target, handle));
        }

        Ok(handles
            .into_iter()
            .map(|(target, handle)| (target.clone(), handle.join().unwrap_or(false)))
            .collect())
    })?;

    let verdict = RoundVerdict::from_results(results);
    debug!("Ping: {} ({}/{})", verdict.summary(), verdict.ok_count, verdict.total);
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Instant;

    struct TableProbe {
        answers: HashMap<String, bool>,
        delay: Duration,
    }

    impl ConnectivityProbe for TableProbe {
        fn probe(&self, target: &str, _timeout: Duration) -> bool {
            thread::sleep(self.delay);
            self.answers.get(target).copied().unwrap_or(false)
        }
    }

    struct PanickingProbe;

    impl ConnectivityProbe for PanickingProbe {
        fn probe(&self, target: &str, _timeout: Duration) -> bool {
            if target == "boom" {
                panic!("probe exploded");
            }
            true
        }
    }

    fn targets(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_majority_rule() {
        assert!(!majority_reachable(0, 0));
        assert!(!majority_reachable(2, 4));
        assert!(majority_reachable(3, 4));
        assert!(!majority_reachable(1, 3));
        assert!(majority_reachable(2, 3));
        assert!(majority_reachable(1, 1));
        assert!(!majority_reachable(0, 1));
    }

    #[test]
    fn test_tie_of_four_targets_is_down() {
        let probe = TableProbe {
            answers: [("A", true), ("B", true), ("C", false), ("D", false)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            delay: Duration::ZERO,
        };

        let verdict = check_connectivity(&probe, &targets(&["A", "B", "C", "D"]), Duration::from_secs(1)).unwrap();
        assert!(!verdict.reachable);
        assert_eq!(verdict.ok_count, 2);
        assert_eq!(verdict.total, 4);
        assert_eq!(verdict.summary(), "A:ok B:ok C:FAIL D:FAIL");
    }

    #[test]
    fn test_probes_run_in_parallel() {
        let probe = TableProbe {
            answers: HashMap::new(),
            delay: Duration::from_millis(200),
        };

        let started = Instant::now();
        let verdict = check_connectivity(&probe, &targets(&["A", "B", "C", "D"]), Duration::from_secs(1)).unwrap();
        assert!(!verdict.reachable);
        assert!(started.elapsed() < Duration::from_millis(700));
    }

    #[test]
    fn test_panicking_probe_counts_as_unreachable() {
        let verdict = check_connectivity(&PanickingProbe, &targets(&["a", "boom", "c"]), Duration::from_secs(1)).unwrap();
        assert_eq!(verdict.ok_count, 2);
        assert!(verdict.reachable);
        assert_eq!(verdict.results[1], ("boom".to_string(), false));
    }

    #[test]
    fn test_empty_target_list_is_down() {
        let verdict = check_connectivity(&PingProbe, &[], Duration::from_secs(1)).unwrap();
        assert!(!verdict.reachable);
        assert_eq!(verdict.total, 0);
    }

    #[test]
    #[ignore = "Requires ping and a working loopback"]
    fn test_ping_loopback() {
        assert!(PingProbe.probe("127.0.0.1", Duration::from_secs(1)));
    }
}
