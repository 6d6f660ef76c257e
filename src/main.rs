use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use env_logger::Env;
use ip_failover::config::DEFAULT_CONFIG_PATH;
use ip_failover::network::list_interfaces;
use ip_failover::{
    CliOverrides, Controller, FailoverConfig, FailoverError, FailoverResult, FileConfig, IpCommandExecutor,
    PingProbe, SysfsTxCounter, TxRateSampler,
};
use log::{error, info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// IP Failover - switch a LAN interface between a primary and a secondary address
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about)]
struct Args {
    /// Path to configuration file
    #[clap(long)]
    config: Option<PathBuf>,

    /// Interface carrying the managed address (e.g., enP1p1s0)
    #[clap(short = 'i', long)]
    interface: Option<String>,

    /// Primary address with prefix (e.g., 192.168.7.1/24)
    #[clap(short = 'p', long)]
    primary: Option<String>,

    /// Secondary address with prefix (e.g., 192.168.7.254/24)
    #[clap(short = 's', long)]
    secondary: Option<String>,

    /// Probe target host, repeatable
    #[clap(long = "target")]
    targets: Vec<String>,

    /// Connectivity check interval in seconds
    #[clap(short = 't', long)]
    interval: Option<u64>,

    /// Consecutive failed rounds before failing over
    #[clap(long)]
    fail_rounds: Option<u32>,

    /// Consecutive healthy rounds before restoring the primary address
    #[clap(long)]
    up_rounds: Option<u32>,

    /// Minimum seconds between two switches
    #[clap(long)]
    min_dwell: Option<u64>,

    /// Throughput in Mbps at or above which failed probes are ignored
    #[clap(long)]
    speed_threshold: Option<f64>,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            interface: self.interface.clone(),
            primary: self.primary.clone(),
            secondary: self.secondary.clone(),
            targets: self.targets.clone(),
            interval: self.interval,
            fail_rounds: self.fail_rounds,
            up_rounds: self.up_rounds,
            min_dwell: self.min_dwell,
            speed_threshold: self.speed_threshold,
        }
    }
}

fn init_logging() {
    // For detailed command tracing, set RUST_LOG=debug
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} | {:<5} | {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();
}

fn ensure_root() -> FailoverResult<()> {
    // SAFETY: geteuid has no preconditions and cannot fail
    if unsafe { libc::geteuid() } != 0 {
        return Err(FailoverError::InsufficientPermissions);
    }
    Ok(())
}

fn print_banner(config: &FailoverConfig, config_path: &Path) {
    warn!("================================================================================");
    warn!("IP FAILOVER v{} - dual validation", env!("CARGO_PKG_VERSION"));
    warn!("Interface: {}", config.interface);
    warn!("Primary address: {}", config.addresses.primary);
    warn!("Secondary address: {}", config.addresses.secondary);
    warn!("Probe targets: {}", config.probe_targets.join(", "));
    warn!("Strategy: DELETE-THEN-ADD (never both addresses at once)");
    warn!(
        "Dual validation: probes + throughput < {} Mbps",
        config.speed_threshold_mbps
    );
    warn!("Config: {:?}", config_path);
    warn!("================================================================================");
}

fn main() -> Result<()> {
    init_logging();

    let args = Args::parse();
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let file_config = FileConfig::load(&config_path)
        .with_context(|| format!("Failed to load config file {:?}", config_path))?;
    if file_config.is_none() {
        info!("Configuration file {:?} not found, using command line arguments only", config_path);
    }

    let config = FailoverConfig::resolve(&args.overrides(), file_config.as_ref())
        .context("Invalid configuration")?;

    ensure_root().context("Interface addresses can only be changed by root")?;

    print_banner(&config, &config_path);

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .context("Failed to install signal handler")?;
    }

    let executor = IpCommandExecutor::new(config.command_timeout, config.announce_count);
    let sampler = TxRateSampler::new(
        SysfsTxCounter::new(&config.interface),
        config.speed_sample_interval,
    );
    let mut controller = Controller::new(config, executor, PingProbe, sampler);

    if let Err(e) = controller.startup() {
        if let FailoverError::InterfaceNotFound(_) = e {
            error!("Available interfaces: {}", list_interfaces().join(", "));
        }
        return Err(e).context("Cannot continue without a valid interface");
    }

    controller.run(&stop).context("Control loop aborted")?;
    info!("Finished after {} rounds", controller.rounds());
    Ok(())
}
