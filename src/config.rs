use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Tunables for the booking service and its store. Constructed explicitly and
/// passed in; nothing here is process-global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingConfig {
    /// Total attempts per locked operation, including the first.
    pub max_retries: u32,
    /// Backoff before retry `i` is `base_delay * 2^i`.
    pub base_delay: Duration,
    /// Upper bound on waiting for a unit's row lock.
    pub lock_wait_timeout: Duration,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            lock_wait_timeout: Duration::from_secs(5),
        }
    }
}

impl BookingConfig {
    /// Overlay `RENTLOCK_MAX_RETRIES`, `RENTLOCK_BASE_DELAY_MS` and
    /// `RENTLOCK_LOCK_WAIT_TIMEOUT_MS` on the defaults. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: env_parse("RENTLOCK_MAX_RETRIES")
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.max_retries),
            base_delay: env_parse("RENTLOCK_BASE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            lock_wait_timeout: env_parse("RENTLOCK_LOCK_WAIT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_wait_timeout),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.base_delay)
    }
}

/// Settings for the status-sweeper daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub sweep_interval: Duration,
    /// WAL appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    pub booking: BookingConfig,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("RENTLOCK_DATA_DIR")
                .unwrap_or_else(|_| "./data".into())
                .into(),
            metrics_port: env_parse("RENTLOCK_METRICS_PORT"),
            sweep_interval: Duration::from_secs(env_parse("RENTLOCK_SWEEP_INTERVAL_SECS").unwrap_or(60)),
            compact_threshold: env_parse("RENTLOCK_COMPACT_THRESHOLD").unwrap_or(1000),
            booking: BookingConfig::from_env(),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
