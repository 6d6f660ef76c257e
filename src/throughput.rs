//! Interface throughput sampling from the transmit byte counter.

use crate::errors::{FailoverError, FailoverResult};
use log::{debug, error, info};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

/// Source of a monotonically increasing transmitted-byte counter
pub trait TxByteCounter {
    fn tx_bytes(&self) -> FailoverResult<u64>;
}

/// Reads `/sys/class/net/<iface>/statistics/tx_bytes`
#[derive(Debug, Clone)]
pub struct SysfsTxCounter {
    path: PathBuf,
}

impl SysfsTxCounter {
    pub fn new(iface: &str) -> Self {
        Self::with_path(format!("/sys/class/net/{}/statistics/tx_bytes", iface))
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TxByteCounter for SysfsTxCounter {
    fn tx_bytes(&self) -> FailoverResult<u64> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            FailoverError::CounterUnavailable(format!("{}: {}", self.path.display(), e))
        })?;

        raw.trim().parse::<u64>().map_err(|e| {
            FailoverError::CounterUnavailable(format!("{}: {:?}: {}", self.path.display(), raw.trim(), e))
        })
    }
}

/// Blocking throughput measurement used to corroborate a suspected outage.
///
/// `None` means the measurement failed; it must never be read as zero throughput.
#[cfg_attr(test, mockall::automock)]
pub trait ThroughputSampler {
    fn measure(&self) -> Option<f64>;
}

impl<T: ThroughputSampler + ?Sized> ThroughputSampler for &T {
    fn measure(&self) -> Option<f64> {
        (**self).measure()
    }
}

/// Average bitrate in Mbps over `interval` for a byte delta
pub fn bitrate_mbps(bytes_delta: u64, interval: Duration) -> f64 {
    (bytes_delta as f64 * 8.0) / (1_000_000.0 * interval.as_secs_f64())
}

/// Samples a byte counter twice, one interval apart
#[derive(Debug, Clone)]
pub struct TxRateSampler<C> {
    counter: C,
    interval: Duration,
}

impl<C: TxByteCounter> TxRateSampler<C> {
    pub fn new(counter: C, interval: Duration) -> Self {
        Self { counter, interval }
    }
}

impl<C: TxByteCounter> ThroughputSampler for TxRateSampler<C> {
    fn measure(&self) -> Option<f64> {
        if self.interval.is_zero() {
            error!("Throughput sampling interval is zero, cannot measure");
            return None;
        }

        let tx0 = match self.counter.tx_bytes() {
            Ok(v) => v,
            Err(e) => {
                error!("Cannot read transmit counter: {}", e);
                return None;
            }
        };

        thread::sleep(self.interval);

        let tx1 = match self.counter.tx_bytes() {
            Ok(v) => v,
            Err(e) => {
                error!("Cannot read transmit counter: {}", e);
                return None;
            }
        };

        let Some(delta) = tx1.checked_sub(tx0) else {
            error!("Transmit counter went backwards ({} -> {}), discarding sample", tx0, tx1);
            return None;
        };

        let mbps = bitrate_mbps(delta, self.interval);
        debug!("tx_bytes {} -> {} over {:?}", tx0, tx1, self.interval);
        info!("Interface throughput: {:.2} Mbps", mbps);
        Some(mbps)
    }
}
