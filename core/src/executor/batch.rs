//! Wave-based executor

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::ExecutorKind;
use crate::distribution::Distribution;
use crate::error::{StressError, StressResult};
use crate::task::{ExecutionResult, TaskDescriptor};
use crate::traits::StopCondition;

use super::pool::WorkerPool;
use super::{ExecutionOutcome, ExecutorHandle, ExecutorState, TaskExecutor};

/// Dispatches waves of at most `min(batch_size, workers)` tasks
///
/// Under stress modulation a wave is further capped at the gate's active
/// limit, so every unit of a wave is admitted when it starts.
/// Every unit of a wave is joined before the next wave is pulled, so waves
/// never overlap. A failed task is recorded and the wave carries on. A
/// distribution error ends dispatch after the partial wave it cut short.
#[derive(Debug)]
pub struct BatchExecutor {
    pool: WorkerPool,
}

/// Why the dispatch loop ended
#[derive(Debug, Default)]
struct Dispatched {
    pulled: u64,
    waves: usize,
    /// Distribution error that cut the last wave short
    ended: Option<StressError>,
}

impl BatchExecutor {
    pub(crate) fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }

    /// Pull up to `want` descriptors; a distribution error ends the wave early
    fn pull_wave(
        distribution: &dyn Distribution,
        want: usize,
        dispatched: &mut Dispatched,
    ) -> Vec<TaskDescriptor> {
        let mut wave = Vec::with_capacity(want);
        for _ in 0..want {
            match distribution.next() {
                Ok(task) => wave.push(task),
                Err(err) => {
                    if !err.is_exhausted() {
                        tracing::error!(
                            distribution = distribution.name(),
                            error = %err,
                            "Distribution failed, dispatching the partial wave"
                        );
                    }
                    dispatched.ended = Some(err);
                    break;
                }
            }
        }
        wave
    }

    async fn dispatch(
        &mut self,
        distribution: &dyn Distribution,
        stop: &StopCondition,
        tx: &mpsc::Sender<ExecutionResult>,
        dispatched: &mut Dispatched,
    ) -> StressResult<()> {
        let started = Instant::now();
        let limit = stop.task_limit();
        let deadline = stop.time_limit();

        loop {
            if self.pool.feed_stopped() {
                tracing::info!(waves = dispatched.waves, "Dispatch stopped");
                break;
            }
            if deadline.is_some_and(|d| started.elapsed() >= d) {
                tracing::info!(waves = dispatched.waves, "Time limit reached");
                break;
            }
            let wave_size = self.pool.wave_capacity();
            let want = match limit {
                Some(n) => n.saturating_sub(dispatched.pulled as usize).min(wave_size),
                None => wave_size,
            };
            if want == 0 {
                break;
            }

            let wave = Self::pull_wave(distribution, want, dispatched);
            if wave.is_empty() {
                break;
            }

            dispatched.waves += 1;
            let size = wave.len();
            tracing::debug!(wave = dispatched.waves, size, "Dispatching wave");

            let mut start_error = None;
            for (unit, task) in self.pool.units.iter_mut().zip(wave) {
                let sequence = dispatched.pulled;
                dispatched.pulled += 1;
                let launched = unit
                    .reset()
                    .and_then(|()| unit.start(task.clone(), sequence, tx.clone()));
                if let Err(err) = launched {
                    tracing::error!(
                        worker_id = unit.id(),
                        sequence,
                        error = %err,
                        "Unit failed to start"
                    );
                    let reason = format!("not started: {err}");
                    let _ = tx.send(ExecutionResult::abandoned(sequence, task, reason)).await;
                    start_error.get_or_insert(err);
                }
            }

            let (stats, supervisor_errors) = self.pool.join_units(false).await;
            tracing::debug!(
                wave = dispatched.waves,
                completed = stats.completed,
                failed = stats.failed,
                cancelled = stats.cancelled,
                "Wave finished"
            );

            if let Some(err) = start_error {
                return Err(err);
            }
            if self.pool.config.stop_on_error && (stats.failed > 0 || supervisor_errors > 0) {
                tracing::info!(wave = dispatched.waves, "Wave had failures, stopping");
                break;
            }
            if dispatched.ended.is_some() {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TaskExecutor for BatchExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Batch
    }

    fn state(&self) -> ExecutorState {
        self.pool.state()
    }

    fn handle(&self) -> ExecutorHandle {
        self.pool.handle()
    }

    async fn run(
        &mut self,
        distribution: Arc<dyn Distribution>,
        stop: StopCondition,
    ) -> ExecutionOutcome {
        if let Err(err) = self.pool.begin() {
            return ExecutionOutcome::failed(Vec::new(), err);
        }
        let (tx, collector) = self.pool.collector();
        self.pool.set_state(ExecutorState::Running);

        let mut dispatched = Dispatched::default();
        let outcome = self
            .dispatch(distribution.as_ref(), &stop, &tx, &mut dispatched)
            .await;

        self.pool.set_state(ExecutorState::Stopping);
        // Only non-empty after a dispatch error left a wave running.
        self.pool.join_units(true).await;
        let results = match self.pool.finish(tx, collector).await {
            Ok(results) => results,
            Err(err) => return ExecutionOutcome::failed(Vec::new(), err),
        };

        let error = match (outcome, dispatched.ended) {
            (Err(err), _) => Some(err),
            (Ok(()), Some(err)) if !err.is_exhausted() || results.is_empty() => Some(err),
            _ => None,
        };
        ExecutionOutcome { results, error }
    }
}
