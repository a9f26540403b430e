//! Pool, stress and shutdown configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::os::PriorityLevel;

/// Executor strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// Fixed-size waves, each fully awaited before the next
    Batch,
    /// Shared bounded queue with pull-based load balancing
    Queue,
}

/// What queue workers do with already-queued work once feeding stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainPolicy {
    /// Execute everything left in the queue
    #[default]
    DrainToEmpty,
    /// Record queued items as cancelled without running them
    AbandonImmediately,
}

/// Worker pool configuration
///
/// Executors take this by value, so it cannot change once an execution
/// phase has started.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker units
    pub workers: usize,

    /// Executor strategy
    pub strategy: ExecutorKind,

    /// Maximum wave size for the batch strategy (defaults to `workers`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Bounded queue capacity for the queue strategy
    pub queue_capacity: usize,

    /// Drain behaviour for the queue strategy
    #[serde(default)]
    pub drain: DrainPolicy,

    /// How long a queue worker waits on an empty queue before re-checking stop flags
    pub poll_interval: Duration,

    /// How long a unit may take to honour a stop request before it is killed
    pub grace_period: Duration,

    /// Optional pool-wide cap on task starts per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_rate: Option<f64>,

    /// Stop dispatching new work after the first failed task
    #[serde(default)]
    pub stop_on_error: bool,

    /// Process priority requested from the OS layer when the pool starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<PriorityLevel>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            strategy: ExecutorKind::Batch,
            batch_size: None,
            queue_capacity: 64,
            drain: DrainPolicy::default(),
            poll_interval: Duration::from_millis(50),
            grace_period: Duration::from_secs(5),
            launch_rate: None,
            stop_on_error: false,
            priority: None,
        }
    }
}

impl PoolConfig {
    /// Create a new config with the given worker count
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    /// Set the executor strategy
    pub fn with_strategy(mut self, strategy: ExecutorKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the batch wave size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Set the queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the drain policy
    pub fn with_drain(mut self, drain: DrainPolicy) -> Self {
        self.drain = drain;
        self
    }

    /// Set the empty-queue poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the per-unit stop grace period
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Set the launch rate (task starts per second)
    pub fn with_launch_rate(mut self, rate: f64) -> Self {
        self.launch_rate = Some(rate);
        self
    }

    /// Stop dispatching after the first failure
    pub fn with_stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    /// Set the process priority
    pub fn with_priority(mut self, level: PriorityLevel) -> Self {
        self.priority = Some(level);
        self
    }

    /// Effective wave size for the batch strategy
    pub fn wave_size(&self) -> usize {
        self.batch_size
            .unwrap_or(self.workers)
            .min(self.workers)
            .max(1)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidWorkers(
                "worker count must be at least 1".into(),
            ));
        }

        if self.batch_size == Some(0) {
            return Err(ConfigError::InvalidBatchSize(
                "batch size must be at least 1".into(),
            ));
        }

        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity(
                "queue capacity must be at least 1".into(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidInterval(
                "poll interval must be positive".into(),
            ));
        }

        if let Some(rate) = self.launch_rate {
            if rate <= 0.0 || !rate.is_finite() {
                return Err(ConfigError::InvalidLaunchRate(
                    "launch rate must be positive".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Sine-wave stress modulation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressConfig {
    /// Length of one full sine cycle
    pub period: Duration,

    /// Peak deviation from `mean`, in workers
    pub amplitude: f64,

    /// Centre line of the wave, in workers
    pub mean: f64,

    /// How often the target worker count is recomputed
    pub control_interval: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(60),
            amplitude: 0.0,
            mean: 1.0,
            control_interval: Duration::from_millis(250),
        }
    }
}

impl StressConfig {
    /// Full-swing modulation for a pool of `workers`
    pub fn full_swing(workers: usize) -> Self {
        let half = workers as f64 / 2.0;
        Self {
            amplitude: half,
            mean: half,
            ..Default::default()
        }
    }

    /// Set the period
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Set the amplitude
    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Set the mean
    pub fn with_mean(mut self, mean: f64) -> Self {
        self.mean = mean;
        self
    }

    /// Set the control interval
    pub fn with_control_interval(mut self, interval: Duration) -> Self {
        self.control_interval = interval;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period.is_zero() {
            return Err(ConfigError::InvalidStress("period must be positive".into()));
        }
        if self.control_interval.is_zero() {
            return Err(ConfigError::InvalidInterval(
                "control interval must be positive".into(),
            ));
        }
        if !self.amplitude.is_finite() || self.amplitude < 0.0 {
            return Err(ConfigError::InvalidStress(
                "amplitude must be a non-negative number".into(),
            ));
        }
        if !self.mean.is_finite() {
            return Err(ConfigError::InvalidStress("mean must be finite".into()));
        }
        Ok(())
    }
}

/// Shutdown coordinator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// How long to wait for all units to stop before forcing them
    pub grace_period: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
        }
    }
}

impl ShutdownConfig {
    /// Set the grace period
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid worker count
    #[error("Invalid worker count: {0}")]
    InvalidWorkers(String),

    /// Invalid batch size
    #[error("Invalid batch size: {0}")]
    InvalidBatchSize(String),

    /// Invalid queue capacity
    #[error("Invalid queue capacity: {0}")]
    InvalidQueueCapacity(String),

    /// Invalid interval
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    /// Invalid launch rate
    #[error("Invalid launch rate: {0}")]
    InvalidLaunchRate(String),

    /// Invalid stress modulation settings
    #[error("Invalid stress settings: {0}")]
    InvalidStress(String),
}
