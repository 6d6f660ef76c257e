//! Controller configuration: built-in defaults, an optional TOML file and CLI overrides.
//!
//! Precedence is CLI -> config file -> defaults. The resolved [`FailoverConfig`] is immutable and
//! handed to every component at construction.

use crate::address::AddressPair;
use crate::errors::{FailoverError, FailoverResult};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ip-failover/config.toml";

/// Fully resolved, validated configuration
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Interface carrying the managed address (e.g., enP1p1s0)
    pub interface: String,

    /// Primary and secondary address-with-prefix
    pub addresses: AddressPair,

    /// Hosts probed every round
    pub probe_targets: Vec<String>,

    /// Deadline for a single probe
    pub probe_timeout: Duration,

    /// Length of one monitoring round
    pub check_period: Duration,

    /// Consecutive failed rounds before a failover is considered
    pub fail_rounds: u32,

    /// Consecutive healthy rounds before falling back to primary
    pub up_rounds: u32,

    /// Minimum time between two completed transitions
    pub min_dwell: Duration,

    /// Throughput at or above which failed probes are treated as a false positive
    pub speed_threshold_mbps: f64,

    /// Time between the two transmit counter reads
    pub speed_sample_interval: Duration,

    pub delay_after_delete: Duration,
    pub delay_after_add: Duration,
    pub delay_before_verify: Duration,

    /// Pause before the single add retry, and after an emergency flush
    pub retry_delay: Duration,

    /// Period of the address set audit
    pub sanity_period: Duration,

    /// Wait after bringing the link up before checking it again
    pub link_up_settle: Duration,

    /// Deadline for any external command
    pub command_timeout: Duration,

    /// Gratuitous ARP packets sent after a switch
    pub announce_count: u8,

    /// Emit a status line every N rounds
    pub status_every: u64,
}

impl FailoverConfig {
    /// Configuration with the given interface and addresses and defaults for everything else
    pub fn new(interface: &str, primary: &str, secondary: &str) -> FailoverResult<Self> {
        let config = FailoverConfig {
            interface: interface.to_string(),
            addresses: AddressPair::new(primary, secondary)?,
            probe_targets: ["8.8.8.8", "1.1.1.1", "9.9.9.9", "8.8.4.4"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            probe_timeout: Duration::from_secs(2),
            check_period: Duration::from_secs(1),
            fail_rounds: 6,
            up_rounds: 6,
            min_dwell: Duration::from_secs(8),
            speed_threshold_mbps: 10.0,
            speed_sample_interval: Duration::from_secs(2),
            delay_after_delete: Duration::from_millis(500),
            delay_after_add: Duration::from_millis(500),
            delay_before_verify: Duration::from_millis(300),
            retry_delay: Duration::from_secs(1),
            sanity_period: Duration::from_secs(30),
            link_up_settle: Duration::from_secs(2),
            command_timeout: Duration::from_secs(5),
            announce_count: 3,
            status_every: 10,
        };
        config.validate()?;
        Ok(config)
    }

    /// Merge CLI overrides over an optional config file over defaults
    pub fn resolve(cli: &CliOverrides, file: Option<&FileConfig>) -> FailoverResult<Self> {
        let iface_section = file.and_then(|f| f.interface.as_ref());
        let probe_section = file.and_then(|f| f.probe.as_ref());
        let failover_section = file.and_then(|f| f.failover.as_ref());
        let throughput_section = file.and_then(|f| f.throughput.as_ref());
        let timing_section = file.and_then(|f| f.timing.as_ref());

        let interface = cli
            .interface
            .clone()
            .or_else(|| iface_section.and_then(|i| i.name.clone()))
            .ok_or_else(|| missing("interface name"))?;
        let primary = cli
            .primary
            .clone()
            .or_else(|| iface_section.and_then(|i| i.primary.clone()))
            .ok_or_else(|| missing("primary address"))?;
        let secondary = cli
            .secondary
            .clone()
            .or_else(|| iface_section.and_then(|i| i.secondary.clone()))
            .ok_or_else(|| missing("secondary address"))?;

        let mut config = FailoverConfig::new(&interface, &primary, &secondary)?;

        if !cli.targets.is_empty() {
            config.probe_targets = cli.targets.clone();
        } else if let Some(targets) = probe_section.and_then(|p| p.targets.clone()) {
            config.probe_targets = targets;
        }
        if let Some(ms) = probe_section.and_then(|p| p.timeout_ms) {
            config.probe_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = cli.interval.or_else(|| probe_section.and_then(|p| p.interval_secs)) {
            config.check_period = Duration::from_secs(secs);
        }

        if let Some(n) = cli.fail_rounds.or_else(|| failover_section.and_then(|f| f.fail_rounds)) {
            config.fail_rounds = n;
        }
        if let Some(n) = cli.up_rounds.or_else(|| failover_section.and_then(|f| f.up_rounds)) {
            config.up_rounds = n;
        }
        if let Some(secs) = cli.min_dwell.or_else(|| failover_section.and_then(|f| f.min_dwell_secs)) {
            config.min_dwell = Duration::from_secs(secs);
        }
        if let Some(secs) = failover_section.and_then(|f| f.sanity_period_secs) {
            config.sanity_period = Duration::from_secs(secs);
        }

        if let Some(mbps) = cli
            .speed_threshold
            .or_else(|| throughput_section.and_then(|t| t.threshold_mbps))
        {
            config.speed_threshold_mbps = mbps;
        }
        if let Some(ms) = throughput_section.and_then(|t| t.sample_interval_ms) {
            config.speed_sample_interval = Duration::from_millis(ms);
        }

        if let Some(timing) = timing_section {
            let ms = |v: Option<u64>, current: Duration| v.map(Duration::from_millis).unwrap_or(current);
            config.delay_after_delete = ms(timing.delay_after_delete_ms, config.delay_after_delete);
            config.delay_after_add = ms(timing.delay_after_add_ms, config.delay_after_add);
            config.delay_before_verify = ms(timing.delay_before_verify_ms, config.delay_before_verify);
            config.retry_delay = ms(timing.retry_delay_ms, config.retry_delay);
            config.link_up_settle = ms(timing.link_up_settle_ms, config.link_up_settle);
            config.command_timeout = ms(timing.command_timeout_ms, config.command_timeout);
            if let Some(count) = timing.announce_count {
                config.announce_count = count;
            }
            if let Some(every) = timing.status_every {
                config.status_every = every;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the control loop cannot run with
    pub fn validate(&self) -> FailoverResult<()> {
        if self.interface.trim().is_empty() {
            return Err(invalid("interface name is empty"));
        }
        if self.probe_targets.is_empty() {
            return Err(invalid("at least one probe target is required"));
        }
        if self.probe_targets.iter().any(|t| t.trim().is_empty()) {
            return Err(invalid("probe targets must not be empty strings"));
        }
        if self.fail_rounds == 0 || self.up_rounds == 0 {
            return Err(invalid("fail_rounds and up_rounds must be at least 1"));
        }
        if !self.speed_threshold_mbps.is_finite() || self.speed_threshold_mbps < 0.0 {
            return Err(invalid("speed threshold must be a non-negative number"));
        }
        if self.speed_sample_interval.is_zero() {
            return Err(invalid("throughput sample interval must be non-zero"));
        }
        if self.check_period.is_zero() {
            return Err(invalid("check interval must be non-zero"));
        }
        if self.probe_timeout.is_zero() || self.probe_timeout.subsec_nanos() != 0 {
            return Err(invalid("probe timeout must be a whole, non-zero number of seconds"));
        }
        if self.status_every == 0 {
            return Err(invalid("status_every must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> FailoverError {
    FailoverError::InvalidConfiguration(msg.to_string())
}

fn missing(what: &str) -> FailoverError {
    FailoverError::InvalidConfiguration(format!("{} is required (in args or config)", what))
}

/// Values given on the command line; `None` falls through to the file and defaults
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub interface: Option<String>,
    pub primary: Option<String>,
    pub secondary: Option<String>,
    pub targets: Vec<String>,
    pub interval: Option<u64>,
    pub fail_rounds: Option<u32>,
    pub up_rounds: Option<u32>,
    pub min_dwell: Option<u64>,
    pub speed_threshold: Option<f64>,
}

/// On-disk TOML layout
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FileConfig {
    pub interface: Option<InterfaceSection>,
    pub probe: Option<ProbeSection>,
    pub failover: Option<FailoverSection>,
    pub throughput: Option<ThroughputSection>,
    pub timing: Option<TimingSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InterfaceSection {
    pub name: Option<String>,
    pub primary: Option<String>,
    pub secondary: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProbeSection {
    pub targets: Option<Vec<String>>,
    /// Must be a multiple of 1000; `ping -W` only takes whole seconds
    pub timeout_ms: Option<u64>,
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FailoverSection {
    pub fail_rounds: Option<u32>,
    pub up_rounds: Option<u32>,
    pub min_dwell_secs: Option<u64>,
    pub sanity_period_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ThroughputSection {
    pub threshold_mbps: Option<f64>,
    pub sample_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimingSection {
    pub delay_after_delete_ms: Option<u64>,
    pub delay_after_add_ms: Option<u64>,
    pub delay_before_verify_ms: Option<u64>,
    pub retry_delay_ms: Option<u64>,
    pub link_up_settle_ms: Option<u64>,
    pub command_timeout_ms: Option<u64>,
    pub announce_count: Option<u8>,
    pub status_every: Option<u64>,
}

impl FileConfig {
    pub fn parse(content: &str) -> FailoverResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read the file if it exists; a missing file is not an error
    pub fn load(path: &Path) -> FailoverResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[interface]
name = "enP1p1s0"
primary = "192.168.7.1/24"
secondary = "192.168.7.254/24"

[probe]
targets = ["8.8.8.8", "1.1.1.1"]
timeout_ms = 3000

[failover]
fail_rounds = 4
min_dwell_secs = 20

[throughput]
threshold_mbps = 5.5

[timing]
delay_after_add_ms = 100
announce_count = 1
"#;

    #[test]
    fn test_defaults() {
        let config = FailoverConfig::new("eth0", "10.0.0.1/24", "10.0.0.254/24").unwrap();
        assert_eq!(config.probe_targets.len(), 4);
        assert_eq!(config.fail_rounds, 6);
        assert_eq!(config.up_rounds, 6);
        assert_eq!(config.min_dwell, Duration::from_secs(8));
        assert_eq!(config.speed_threshold_mbps, 10.0);
        assert_eq!(config.sanity_period, Duration::from_secs(30));
    }

    #[test]
    fn test_file_values_apply() {
        let file = FileConfig::parse(SAMPLE).unwrap();
        let config = FailoverConfig::resolve(&CliOverrides::default(), Some(&file)).unwrap();

        assert_eq!(config.interface, "enP1p1s0");
        assert_eq!(config.addresses.primary.cidr(), "192.168.7.1/24");
        assert_eq!(config.probe_targets, vec!["8.8.8.8", "1.1.1.1"]);
        assert_eq!(config.probe_timeout, Duration::from_secs(3));
        assert_eq!(config.fail_rounds, 4);
        assert_eq!(config.up_rounds, 6);
        assert_eq!(config.min_dwell, Duration::from_secs(20));
        assert_eq!(config.speed_threshold_mbps, 5.5);
        assert_eq!(config.delay_after_add, Duration::from_millis(100));
        assert_eq!(config.delay_after_delete, Duration::from_millis(500));
        assert_eq!(config.announce_count, 1);
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = FileConfig::parse(SAMPLE).unwrap();
        let cli = CliOverrides {
            interface: Some("eth1".to_string()),
            targets: vec!["9.9.9.9".to_string()],
            fail_rounds: Some(3),
            speed_threshold: Some(50.0),
            ..Default::default()
        };
        let config = FailoverConfig::resolve(&cli, Some(&file)).unwrap();

        assert_eq!(config.interface, "eth1");
        assert_eq!(config.probe_targets, vec!["9.9.9.9"]);
        assert_eq!(config.fail_rounds, 3);
        assert_eq!(config.speed_threshold_mbps, 50.0);
        assert_eq!(config.addresses.secondary.cidr(), "192.168.7.254/24");
    }

    #[test]
    fn test_missing_required_values() {
        let err = FailoverConfig::resolve(&CliOverrides::default(), None).unwrap_err();
        assert!(err.to_string().contains("interface name is required"));

        let cli = CliOverrides {
            interface: Some("eth0".to_string()),
            primary: Some("10.0.0.1/24".to_string()),
            ..Default::default()
        };
        let err = FailoverConfig::resolve(&cli, None).unwrap_err();
        assert!(err.to_string().contains("secondary address"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = FailoverConfig::new("eth0", "10.0.0.1/24", "10.0.0.254/24").unwrap();
        config.fail_rounds = 0;
        assert!(config.validate().is_err());

        let mut config = FailoverConfig::new("eth0", "10.0.0.1/24", "10.0.0.254/24").unwrap();
        config.probe_targets.clear();
        assert!(config.validate().is_err());

        let mut config = FailoverConfig::new("eth0", "10.0.0.1/24", "10.0.0.254/24").unwrap();
        config.speed_threshold_mbps = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = FailoverConfig::new("eth0", "10.0.0.1/24", "10.0.0.254/24").unwrap();
        config.probe_timeout = Duration::from_millis(1500);
        assert!(config.validate().is_err());
        config.probe_timeout = Duration::from_millis(500);
        assert!(config.validate().is_err());

        assert!(FailoverConfig::new("", "10.0.0.1/24", "10.0.0.254/24").is_err());
        assert!(FailoverConfig::new("eth0", "10.0.0.1/24", "10.0.0.1/24").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let loaded = FileConfig::load(file.path()).unwrap().unwrap();
        assert_eq!(loaded.failover.unwrap().fail_rounds, Some(4));

        let dir = tempfile::tempdir().unwrap();
        assert!(FileConfig::load(&dir.path().join("absent.toml")).unwrap().is_none());
    }

    #[test]
    fn test_fractional_probe_timeout_is_rejected() {
        let file = FileConfig::parse(&SAMPLE.replace("timeout_ms = 3000", "timeout_ms = 1500")).unwrap();
        let err = FailoverConfig::resolve(&CliOverrides::default(), Some(&file)).unwrap_err();
        assert!(err.to_string().contains("whole"));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let err = FileConfig::parse("[interface\nname = ").unwrap_err();
        assert!(matches!(err, FailoverError::ConfigParse(_)));
    }
}
