//! Builder pattern for WorkerUnit construction

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{StressError, StressResult};
use crate::os::{AffinityMask, OsAbstraction, PortableOs};
use crate::traits::TaskRunner;

use super::gate::PauseGate;
use super::rate_limiter::TaskRateLimiter;
use super::unit::WorkerUnit;

/// Builder for creating [`WorkerUnit`] instances
///
/// Only the runner is required. Defaults: [`PortableOs`], no affinity, an
/// open gate, no launch throttling, a 5 second grace period and a fresh
/// parent token.
///
/// # Example
/// ```ignore
/// let unit = WorkerUnitBuilder::new(0)
///     .runner(runner)
///     .gate(gate.clone())
///     .limiter(limiter.clone())
///     .grace_period(Duration::from_secs(2))
///     .parent_token(executor_token.clone())
///     .build()?;
/// ```
pub struct WorkerUnitBuilder {
    id: usize,
    runner: Option<Arc<dyn TaskRunner>>,
    os: Option<Arc<dyn OsAbstraction>>,
    affinity: Option<AffinityMask>,
    gate: Option<PauseGate>,
    limiter: Option<Arc<TaskRateLimiter>>,
    grace: Duration,
    parent: Option<CancellationToken>,
}

impl WorkerUnitBuilder {
    /// Create a new builder with the given worker ID
    pub fn new(id: usize) -> Self {
        Self {
            id,
            runner: None,
            os: None,
            affinity: None,
            gate: None,
            limiter: None,
            grace: Duration::from_secs(5),
            parent: None,
        }
    }

    /// Set the task runner
    pub fn runner(mut self, runner: Arc<dyn TaskRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Set the OS layer
    pub fn os(mut self, os: Arc<dyn OsAbstraction>) -> Self {
        self.os = Some(os);
        self
    }

    /// Set the CPU placement
    pub fn affinity(mut self, affinity: Option<AffinityMask>) -> Self {
        self.affinity = affinity;
        self
    }

    /// Share a pool gate
    pub fn gate(mut self, gate: PauseGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Share a pool launch limiter
    pub fn limiter(mut self, limiter: Arc<TaskRateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Set the stop grace period
    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Derive the unit's stop signal from this token
    pub fn parent_token(mut self, token: CancellationToken) -> Self {
        self.parent = Some(token);
        self
    }

    /// Build the WorkerUnit
    ///
    /// # Errors
    /// Returns an error if no runner was supplied.
    pub fn build(self) -> StressResult<WorkerUnit> {
        let runner = self.runner.ok_or(StressError::missing("runner"))?;
        let os = self.os.unwrap_or_else(|| Arc::new(PortableOs));

        Ok(WorkerUnit::new(
            self.id,
            runner,
            os,
            self.affinity,
            self.gate.unwrap_or_default(),
            self.limiter.unwrap_or_default(),
            self.grace,
            self.parent.unwrap_or_default(),
        ))
    }
}
