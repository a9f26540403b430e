//! Builder pattern for executor construction

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::channel::ChannelConfig;
use crate::config::{ExecutorKind, PoolConfig};
use crate::error::{StressError, StressResult};
use crate::os::{NumaTopology, OsAbstraction, PortableOs};
use crate::traits::TaskRunner;

use super::batch::BatchExecutor;
use super::pool::WorkerPool;
use super::queue::QueueExecutor;
use super::TaskExecutor;

/// Builder for creating an executor with proper configuration
///
/// # Example
///
/// ```ignore
/// let executor = ExecutorBuilder::new()
///     .config(PoolConfig::new(4).with_strategy(ExecutorKind::Queue))
///     .runner(tool.runner())
///     .stopping_token(coordinator.stopping_token())
///     .build()?;
/// ```
pub struct ExecutorBuilder {
    config: PoolConfig,
    runner: Option<Arc<dyn TaskRunner>>,
    os: Option<Arc<dyn OsAbstraction>>,
    topology: Option<NumaTopology>,
    stopping: Option<CancellationToken>,
    channel_config: ChannelConfig,
}

impl ExecutorBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
            runner: None,
            os: None,
            topology: None,
            stopping: None,
            channel_config: ChannelConfig::default(),
        }
    }

    /// Set the full pool configuration
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the number of worker units
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Set the strategy
    pub fn strategy(mut self, strategy: ExecutorKind) -> Self {
        self.config.strategy = strategy;
        self
    }

    /// Set the task runner
    pub fn runner(mut self, runner: Arc<dyn TaskRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Set the OS layer (defaults to [`PortableOs`])
    pub fn os(mut self, os: Arc<dyn OsAbstraction>) -> Self {
        self.os = Some(os);
        self
    }

    /// Set the NUMA topology (defaults to [`NumaTopology::detect`])
    pub fn topology(mut self, topology: NumaTopology) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Derive the executor's stop signal from a process-wide token
    pub fn stopping_token(mut self, token: CancellationToken) -> Self {
        self.stopping = Some(token);
        self
    }

    /// Set the channel configuration
    pub fn channel_config(mut self, config: ChannelConfig) -> Self {
        self.channel_config = config;
        self
    }

    fn pool(self) -> StressResult<WorkerPool> {
        let runner = self.runner.ok_or_else(|| StressError::missing("runner"))?;
        let os = self.os.unwrap_or_else(|| Arc::new(PortableOs));
        let topology = self.topology.unwrap_or_else(NumaTopology::detect);
        let stopping = self.stopping.unwrap_or_default();

        WorkerPool::new(
            self.config,
            runner,
            os,
            &topology,
            &stopping,
            self.channel_config,
        )
    }

    /// Build the executor named by the configured strategy
    ///
    /// # Errors
    ///
    /// Returns an error if no runner is set or if configuration validation
    /// fails.
    pub fn build(self) -> StressResult<Box<dyn TaskExecutor>> {
        Ok(match self.config.strategy {
            ExecutorKind::Batch => Box::new(self.build_batch()?),
            ExecutorKind::Queue => Box::new(self.build_queue()?),
        })
    }

    /// Build a [`BatchExecutor`] regardless of the configured strategy
    ///
    /// # Errors
    ///
    /// See [`build`](Self::build).
    pub fn build_batch(mut self) -> StressResult<BatchExecutor> {
        self.config.strategy = ExecutorKind::Batch;
        Ok(BatchExecutor::new(self.pool()?))
    }

    /// Build a [`QueueExecutor`] regardless of the configured strategy
    ///
    /// # Errors
    ///
    /// See [`build`](Self::build).
    pub fn build_queue(mut self) -> StressResult<QueueExecutor> {
        self.config.strategy = ExecutorKind::Queue;
        Ok(QueueExecutor::new(self.pool()?))
    }
}

impl Default for ExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
