use std::path::PathBuf;
use std::time::Duration;

use crate::inventory::resolver::FallThrough;
use crate::inventory::resource::{ClusterStatus, CommandStatus};

/// Retry policy applied by the stage driver to retryable stage failures.
///
/// `max_attempts` counts every attempt of a stage, the first one included.
/// Delays grow as `initial_backoff_ms * multiplier^(attempt - 1)`, are capped
/// at `max_backoff_ms`, and then get up to `jitter_ratio` of random spread.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Fraction in [0.0, 1.0] of the capped delay that is randomized.
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 250,
            max_backoff_ms: 10_000,
            multiplier: 2.0,
            jitter_ratio: 0.2,
        }
    }
}

impl RetryConfig {
    /// Fixed delay, no growth, no jitter. Mostly useful in tests.
    pub fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: delay_ms,
            max_backoff_ms: delay_ms,
            multiplier: 1.0,
            jitter_ratio: 0.0,
        }
    }
}

/// Settings for the agent that drives a single job through its stages.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Parent directory under which each job gets `<jobs_root>/<job_id>`.
    pub jobs_root: PathBuf,
    /// Reported to the job service as part of the client metadata.
    pub hostname: String,
    pub retry: RetryConfig,
    pub monitor_poll_interval_ms: u64,
    /// Upper bound for the cleanup finalizer after a failure or kill.
    pub cleanup_timeout_ms: u64,
    /// Remove the job directory during cleanup.
    pub delete_job_directory: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            jobs_root: std::env::temp_dir().join("dispatch-lite").join("jobs"),
            hostname: "localhost".to_string(),
            retry: RetryConfig::default(),
            monitor_poll_interval_ms: 250,
            cleanup_timeout_ms: 30_000,
            delete_job_directory: false,
        }
    }
}

impl AgentConfig {
    pub fn new(jobs_root: impl Into<PathBuf>) -> Self {
        Self {
            jobs_root: jobs_root.into(),
            ..Default::default()
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_monitor_poll_interval_ms(mut self, interval_ms: u64) -> Self {
        self.monitor_poll_interval_ms = interval_ms;
        self
    }

    pub fn with_cleanup_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.cleanup_timeout_ms = timeout_ms;
        self
    }

    pub fn with_delete_job_directory(mut self, delete: bool) -> Self {
        self.delete_job_directory = delete;
        self
    }

    pub fn monitor_poll_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_poll_interval_ms)
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_millis(self.cleanup_timeout_ms)
    }
}

/// Settings for criteria resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    pub fall_through: FallThrough,
    /// Status injected into cluster criteria that do not name one.
    pub default_cluster_status: ClusterStatus,
    /// Status injected into command criteria that do not name one.
    pub default_command_status: CommandStatus,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            fall_through: FallThrough::ZeroClusters,
            default_cluster_status: ClusterStatus::Up,
            default_command_status: CommandStatus::Active,
        }
    }
}

impl ResolverConfig {
    pub fn with_fall_through(mut self, fall_through: FallThrough) -> Self {
        self.fall_through = fall_through;
        self
    }
}
