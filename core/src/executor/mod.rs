//! Executors: drive a worker pool over a distribution
//!
//! Two strategies implement [`TaskExecutor`]:
//!
//! - [`BatchExecutor`] dispatches fixed-size waves and waits for every unit
//!   of a wave before starting the next one
//! - [`QueueExecutor`] feeds a bounded [`WorkQueue`](crate::worker::WorkQueue)
//!   that a fixed pool of units pulls from, so fast units pick up the slack
//!   of slow ones
//!
//! Both collect [`ExecutionResult`]s through an mpsc channel and return them
//! in distribution order, together with the error that ended the phase, if
//! any. The [`ExecutorHandle`] is how the rest of the
//! process (stress controller, shutdown coordinator) reaches a running pool.
//!
//! # Example
//!
//! ```ignore
//! use memstress_core::{ExecutorBuilder, ExecutorKind, PoolConfig, StopCondition};
//!
//! let mut executor = ExecutorBuilder::new()
//!     .config(PoolConfig::new(8).with_strategy(ExecutorKind::Queue))
//!     .runner(runner)
//!     .build()?;
//!
//! let outcome = executor.run(distribution, StopCondition::TaskCount(1000)).await;
//! let results = outcome.into_result()?;
//! ```

mod aggregator;
mod batch;
mod builder;
mod pool;
mod queue;

pub use aggregator::{summarize, CommandSummary, ResultSummary};
pub use batch::BatchExecutor;
pub use builder::ExecutorBuilder;
pub use queue::QueueExecutor;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::ExecutorKind;
use crate::distribution::Distribution;
use crate::error::{StressError, StressResult};
use crate::task::ExecutionResult;
use crate::traits::StopCondition;
use crate::worker::{PauseGate, WorkerControl};

/// Executor lifecycle state
///
/// `Stopped` is published only after every unit of the pool has been joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutorState {
    /// Pool built, nothing dispatched
    #[default]
    Created,
    /// `run` accepted, units being prepared
    Started,
    /// Dispatching work
    Running,
    /// No new work is dispatched; waiting for units
    Stopping,
    /// Every unit is terminal and results are collected
    Stopped,
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutorState::Created => "CREATED",
            ExecutorState::Started => "STARTED",
            ExecutorState::Running => "RUNNING",
            ExecutorState::Stopping => "STOPPING",
            ExecutorState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// Cloneable view of a running executor
#[derive(Debug, Clone)]
pub struct ExecutorHandle {
    workers: Arc<Vec<WorkerControl>>,
    token: CancellationToken,
    feed_stop: CancellationToken,
    gate: PauseGate,
    state: watch::Receiver<ExecutorState>,
}

impl ExecutorHandle {
    /// Stop dispatching new work
    ///
    /// In-flight tasks finish. What happens to queued work follows the pool's
    /// [`DrainPolicy`](crate::config::DrainPolicy).
    pub fn stop(&self) {
        self.feed_stop.cancel();
    }

    /// Stop dispatching and ask every unit to stop
    pub fn stop_all(&self) {
        self.token.cancel();
    }

    /// Whether a stop of either kind has been requested
    pub fn is_stopping(&self) -> bool {
        self.feed_stop.is_cancelled()
    }

    /// Control handles of every unit in the pool
    pub fn workers(&self) -> &[WorkerControl] {
        &self.workers
    }

    /// Number of units in the pool
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// The pool's admission gate
    pub fn gate(&self) -> &PauseGate {
        &self.gate
    }

    /// Current executor state
    pub fn state(&self) -> ExecutorState {
        *self.state.borrow()
    }

    /// Wait until the executor reports `Stopped`
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_stopped(&self, timeout: Duration) -> bool {
        let mut rx = self.state.clone();
        let waited =
            tokio::time::timeout(timeout, rx.wait_for(|s| *s == ExecutorState::Stopped)).await;
        matches!(waited, Ok(Ok(_)))
    }
}

/// What one execution phase produced
///
/// A phase cut short by a structural error still carries every result
/// collected before the error.
#[derive(Debug, Default)]
pub struct ExecutionOutcome {
    /// Results in distribution order
    pub results: Vec<ExecutionResult>,

    /// Error that ended the phase early
    pub error: Option<StressError>,
}

impl ExecutionOutcome {
    /// Phase that ran to its stop condition
    pub fn completed(results: Vec<ExecutionResult>) -> Self {
        Self {
            results,
            error: None,
        }
    }

    /// Phase ended by `error` after collecting `results`
    pub fn failed(results: Vec<ExecutionResult>, error: StressError) -> Self {
        Self {
            results,
            error: Some(error),
        }
    }

    /// Whether the phase ended without a structural error
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The results, or the error if there was one
    ///
    /// # Errors
    /// The phase error; the collected results are dropped.
    pub fn into_result(self) -> StressResult<Vec<ExecutionResult>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.results),
        }
    }
}

/// Strategy for running a distribution on a worker pool
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Strategy implemented by this executor
    fn kind(&self) -> ExecutorKind;

    /// Current lifecycle state
    fn state(&self) -> ExecutorState;

    /// A handle for stopping and observing the pool from elsewhere
    fn handle(&self) -> ExecutorHandle;

    /// Run one execution phase
    ///
    /// An executor runs once; a second call fails with
    /// [`StressError::Executor`]. The outcome's error is also set when the
    /// distribution fails, or when a finite distribution is exhausted
    /// before producing a single descriptor. Results gathered before an
    /// error are kept.
    async fn run(
        &mut self,
        distribution: Arc<dyn Distribution>,
        stop: StopCondition,
    ) -> ExecutionOutcome;
}

#[cfg(test)]
mod tests;
