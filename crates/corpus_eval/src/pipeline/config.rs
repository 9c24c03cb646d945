//! src/pipeline/config.rs
//!
//! Configuration for the evaluation pipeline.
//!
//! Example:
//! ```ignore
//! let config = PipelineConfig::builder()
//!     .num_workers(4)
//!     .queue_capacity(64)
//!     .result_timeout(Duration::from_secs(60))
//!     .failure_policy(FailurePolicy::Skip)
//!     .build();
//! ```
//!
//! # Performance considerations:
//! - `num_workers`: each worker holds a reference to the shared engine, so
//!   more workers cost threads, not model copies
//! - `queue_capacity`: bounds samples in flight between dispatcher and workers
//! - `result_capacity`: bounds finished results waiting for the collector

use crate::error::{EvalError, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use sysinfo::{System, SystemExt};

/// What the collector does when a worker reports a failed sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort the run with an error naming the sample.
    #[default]
    FailFast,
    /// Record the failure, leave the sample out of the aggregate and go on.
    Skip,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fail" | "fail-fast" | "failfast" => Ok(Self::FailFast),
            "skip" => Ok(Self::Skip),
            _ => Err(format!(
                "Unknown failure policy: '{}'. Valid options: fail, skip",
                s
            )),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailFast => write!(f, "fail"),
            Self::Skip => write!(f, "skip"),
        }
    }
}

/// Worker count used when `num_workers` is 0: half the logical CPUs minus
/// one, never less than one.
pub fn auto_worker_count() -> usize {
    let mut sys = System::new();
    sys.refresh_cpu();
    (sys.cpus().len() / 2).saturating_sub(1).max(1)
}

/// Configuration for the evaluation pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of scoring workers (0 = auto)
    pub num_workers: usize,
    /// Capacity of the dispatcher → worker queue (must be > 0)
    pub queue_capacity: usize,
    /// Capacity of the worker → collector queue (must be > 0)
    pub result_capacity: usize,
    /// Longest the collector waits without receiving any result before it
    /// declares the pool stuck. Default: 300s
    pub result_timeout: Duration,
    /// How often idle workers and the dispatcher check for shutdown.
    /// A polling interval, not an error timeout. Default: 100ms
    pub worker_poll_interval: Duration,
    /// How long `shutdown_all` waits for workers to exit before detaching
    /// them. Default: 5s
    pub shutdown_grace: Duration,
    /// Log progress every this many results (must be > 0). Default: 100
    pub progress_interval: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_workers: 0,
            queue_capacity: 64,
            result_capacity: 64,
            result_timeout: Duration::from_secs(300),
            worker_poll_interval: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(5),
            progress_interval: 100,
            failure_policy: FailurePolicy::FailFast,
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// The worker count to spawn, with `0` resolved to [`auto_worker_count`].
    pub fn resolved_workers(&self) -> usize {
        if self.num_workers == 0 {
            auto_worker_count()
        } else {
            self.num_workers
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(EvalError::Config(
                "queue_capacity must be > 0; a zero-capacity queue would serialize dispatch"
                    .into(),
            ));
        }
        if self.result_capacity == 0 {
            return Err(EvalError::Config("result_capacity must be > 0".into()));
        }
        if self.progress_interval == 0 {
            return Err(EvalError::Config("progress_interval must be > 0".into()));
        }
        if self.result_timeout.is_zero() {
            return Err(EvalError::Config("result_timeout must be non-zero".into()));
        }
        if self.worker_poll_interval.is_zero() {
            return Err(EvalError::Config(
                "worker_poll_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for PipelineConfig with method chaining
#[derive(Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Set the number of workers (0 = auto)
    pub fn num_workers(mut self, workers: usize) -> Self {
        self.config.num_workers = workers;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn result_capacity(mut self, capacity: usize) -> Self {
        self.config.result_capacity = capacity;
        self
    }

    /// Set the no-progress deadline.
    ///
    /// - Too low: may abort during legitimately slow samples.
    /// - Too high: delays detection of stuck workers.
    pub fn result_timeout(mut self, timeout: Duration) -> Self {
        self.config.result_timeout = timeout;
        self
    }

    /// Set the worker polling interval
    ///
    /// - Too low: more responsive shutdown, higher CPU usage.
    /// - Too high: less CPU overhead, slower shutdown response
    pub fn worker_poll_interval(mut self, interval: Duration) -> Self {
        self.config.worker_poll_interval = interval;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    pub fn progress_interval(mut self, every: usize) -> Self {
        self.config.progress_interval = every;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn build(self) -> PipelineConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_fields() -> anyhow::Result<()> {
        let config = PipelineConfig::builder()
            .num_workers(3)
            .queue_capacity(8)
            .result_capacity(4)
            .result_timeout(Duration::from_secs(1))
            .progress_interval(10)
            .failure_policy(FailurePolicy::Skip)
            .build();
        config.validate()?;
        assert_eq!(config.resolved_workers(), 3);
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.failure_policy, FailurePolicy::Skip);
        Ok(())
    }

    #[test]
    fn test_zero_capacities_are_rejected() {
        for config in [
            PipelineConfig::builder().queue_capacity(0).build(),
            PipelineConfig::builder().result_capacity(0).build(),
            PipelineConfig::builder().progress_interval(0).build(),
            PipelineConfig::builder().result_timeout(Duration::ZERO).build(),
        ] {
            let err = config.validate().unwrap_err();
            assert!(err.is_configuration(), "{err}");
        }
    }

    #[test]
    fn test_auto_worker_count_is_at_least_one() {
        assert!(auto_worker_count() >= 1);
        assert!(PipelineConfig::default().resolved_workers() >= 1);
    }

    #[test]
    fn test_failure_policy_parsing() {
        assert_eq!("skip".parse::<FailurePolicy>(), Ok(FailurePolicy::Skip));
        assert_eq!("FAIL".parse::<FailurePolicy>(), Ok(FailurePolicy::FailFast));
        assert!("retry".parse::<FailurePolicy>().is_err());
        assert_eq!(FailurePolicy::Skip.to_string(), "skip");
    }
}
