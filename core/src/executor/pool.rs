//! Worker pool shared by both executor strategies

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::ChannelConfig;
use crate::config::PoolConfig;
use crate::error::{StressError, StressResult};
use crate::os::{NumaTopology, OsAbstraction};
use crate::task::{ExecutionResult, TaskStatus};
use crate::traits::TaskRunner;
use crate::worker::{PauseGate, TaskRateLimiter, WorkerStats, WorkerUnit, WorkerUnitBuilder};

use super::{ExecutorHandle, ExecutorState};

/// Units, signals and shared pool resources for one execution phase
pub(crate) struct WorkerPool {
    pub(crate) config: PoolConfig,
    pub(crate) units: Vec<WorkerUnit>,
    os: Arc<dyn OsAbstraction>,
    /// Executor-wide stop: child of the process stopping token, parent of every unit
    token: CancellationToken,
    /// Dispatch stop: child of `token`
    pub(crate) feed_stop: CancellationToken,
    state: watch::Sender<ExecutorState>,
    channel: ChannelConfig,
    handle: ExecutorHandle,
}

impl WorkerPool {
    pub(crate) fn new(
        config: PoolConfig,
        runner: Arc<dyn TaskRunner>,
        os: Arc<dyn OsAbstraction>,
        topology: &NumaTopology,
        parent: &CancellationToken,
        channel: ChannelConfig,
    ) -> StressResult<Self> {
        config.validate()?;

        let plan = os.get_worker_affinity_plan(config.workers, topology);
        let gate = PauseGate::open();
        let limiter = Arc::new(TaskRateLimiter::new(config.launch_rate));
        let token = parent.child_token();
        let feed_stop = token.child_token();

        let units = (0..config.workers)
            .map(|id| {
                WorkerUnitBuilder::new(id)
                    .runner(Arc::clone(&runner))
                    .os(Arc::clone(&os))
                    .affinity(plan.get(id).cloned())
                    .gate(gate.clone())
                    .limiter(Arc::clone(&limiter))
                    .grace_period(config.grace_period)
                    .parent_token(token.clone())
                    .build()
            })
            .collect::<StressResult<Vec<_>>>()?;

        let (state, state_rx) = watch::channel(ExecutorState::Created);
        let handle = ExecutorHandle {
            workers: Arc::new(units.iter().map(WorkerUnit::control).collect()),
            token: token.clone(),
            feed_stop: feed_stop.clone(),
            gate,
            state: state_rx,
        };

        Ok(Self {
            config,
            units,
            os,
            token,
            feed_stop,
            state,
            channel,
            handle,
        })
    }

    pub(crate) fn handle(&self) -> ExecutorHandle {
        self.handle.clone()
    }

    pub(crate) fn state(&self) -> ExecutorState {
        *self.state.borrow()
    }

    pub(crate) fn set_state(&self, state: ExecutorState) {
        tracing::debug!(%state, "Executor state changed");
        self.state.send_replace(state);
    }

    /// Accept a `run` call: `Created -> Started`, apply process priority
    pub(crate) fn begin(&self) -> StressResult<()> {
        let current = self.state();
        if current != ExecutorState::Created {
            return Err(StressError::executor(format!(
                "executor already ran (state {current})"
            )));
        }
        self.set_state(ExecutorState::Started);

        if let Some(level) = self.config.priority {
            if let Err(err) = self.os.set_priority(level) {
                tracing::warn!(error = %err, ?level, "Failed to set process priority");
            }
        }

        tracing::info!(
            strategy = ?self.config.strategy,
            workers = self.config.workers,
            platform = self.os.platform_name(),
            launch_rate = ?self.config.launch_rate,
            "Execution phase starting"
        );
        Ok(())
    }

    /// Size of the next batch wave, narrowed by the gate's active limit
    pub(crate) fn wave_capacity(&self) -> usize {
        self.config
            .wave_size()
            .min(self.handle.gate().active_limit())
            .max(1)
    }

    /// Whether dispatch should stop (feed stop or executor-wide stop)
    pub(crate) fn feed_stopped(&self) -> bool {
        self.feed_stop.is_cancelled()
    }

    /// Whether the executor-wide stop has fired
    pub(crate) fn hard_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Result channel plus a collector task that owns the aggregated list
    ///
    /// With `stop_on_error` set, the collector cancels the feed on the first
    /// failure it sees.
    pub(crate) fn collector(
        &self,
    ) -> (
        mpsc::Sender<ExecutionResult>,
        JoinHandle<Vec<ExecutionResult>>,
    ) {
        let (tx, mut rx) = mpsc::channel::<ExecutionResult>(self.channel.results_buffer);
        let stop_on_failure = self.config.stop_on_error.then(|| self.feed_stop.clone());

        let collector = tokio::spawn(async move {
            let mut results = Vec::new();
            while let Some(result) = rx.recv().await {
                if result.status == TaskStatus::Failure {
                    if let Some(feed_stop) = &stop_on_failure {
                        if !feed_stop.is_cancelled() {
                            tracing::info!(
                                sequence = result.sequence,
                                "Task failed with stop-on-error set, stopping dispatch"
                            );
                            feed_stop.cancel();
                        }
                    }
                }
                results.push(result);
            }
            results
        });

        (tx, collector)
    }

    /// Join every started unit, stopping them first if `stop` is set
    pub(crate) async fn join_units(&mut self, stop: bool) -> (WorkerStats, usize) {
        let units: Vec<&mut WorkerUnit> = self
            .units
            .iter_mut()
            .filter(|u| u.is_joinable())
            .collect();
        if stop {
            units.iter().for_each(|u| u.request_stop());
        }

        let outcomes = join_all(units.into_iter().map(|u| u.wait())).await;

        let mut totals = WorkerStats::new();
        let mut errors = 0;
        for outcome in outcomes {
            match outcome {
                Ok(stats) => totals.merge(&stats),
                Err(err) => {
                    errors += 1;
                    tracing::error!(error = %err, "Worker supervisor failed");
                }
            }
        }
        (totals, errors)
    }

    /// Drop the sender, collect and order results, publish `Stopped`
    pub(crate) async fn finish(
        &self,
        tx: mpsc::Sender<ExecutionResult>,
        collector: JoinHandle<Vec<ExecutionResult>>,
    ) -> StressResult<Vec<ExecutionResult>> {
        drop(tx);
        let collected = collector
            .await
            .map_err(|err| StressError::executor(format!("result collector failed: {err}")));
        self.set_state(ExecutorState::Stopped);

        let mut results = collected?;
        results.sort_by_key(|r| r.sequence);

        let summary = super::summarize(&results);
        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Execution phase finished"
        );
        Ok(results)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("units", &self.units.len())
            .field("state", &self.state())
            .finish()
    }
}
