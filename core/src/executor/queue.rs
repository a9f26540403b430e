//! Shared-queue executor with pull-based load balancing

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::ExecutorKind;
use crate::distribution::Distribution;
use crate::error::StressError;
use crate::task::ExecutionResult;
use crate::traits::StopCondition;
use crate::worker::{QueuedTask, WorkQueue};

use super::pool::WorkerPool;
use super::{ExecutionOutcome, ExecutorHandle, ExecutorState, TaskExecutor};

/// Runs a fixed pool of units over one bounded FIFO
///
/// A feeder task moves descriptors from the distribution into the queue
/// until the task count is reached, the distribution is exhausted or the
/// feed is stopped; it then closes the queue. Each enqueued descriptor
/// yields exactly one result: executed, or recorded as cancelled when the
/// queue is abandoned or the process is stopping.
#[derive(Debug)]
pub struct QueueExecutor {
    pool: WorkerPool,
}

#[derive(Debug)]
struct FeedOutcome {
    enqueued: u64,
    error: Option<StressError>,
    /// Pulled descriptor the closed queue refused
    stranded: Option<QueuedTask>,
}

/// Move descriptors into the queue until a stop condition
///
/// A slot is reserved before the distribution is advanced, so a feed stop
/// never leaves a pulled descriptor without a result.
async fn feed(
    distribution: Arc<dyn Distribution>,
    queue: Arc<WorkQueue<QueuedTask>>,
    limit: Option<usize>,
    feed_stop: CancellationToken,
) -> FeedOutcome {
    let mut enqueued: u64 = 0;
    let mut stranded = None;
    let error = loop {
        if limit.is_some_and(|n| enqueued as usize >= n) || feed_stop.is_cancelled() {
            break None;
        }
        let Some(slot) = queue.reserve(&feed_stop).await else {
            break None;
        };
        let task = match distribution.next() {
            Ok(task) => task,
            Err(err) => break Some(err),
        };
        let item = QueuedTask {
            sequence: enqueued,
            task,
        };
        if let Err(item) = slot.fill(item) {
            stranded = Some(item);
            break None;
        }
        enqueued += 1;
    };
    queue.close();
    tracing::debug!(enqueued, "Feeder finished");
    FeedOutcome {
        enqueued,
        error,
        stranded,
    }
}

impl QueueExecutor {
    pub(crate) fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }

    fn leftovers(&self, queue: &WorkQueue<QueuedTask>) -> Vec<ExecutionResult> {
        let reason = if self.pool.hard_stopped() {
            "executor stopped before the task was started"
        } else {
            "queue abandoned"
        };
        queue
            .drain_remaining()
            .into_iter()
            .map(|item| ExecutionResult::abandoned(item.sequence, item.task, reason))
            .collect()
    }
}

#[async_trait]
impl TaskExecutor for QueueExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Queue
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
        let queue = Arc::new(WorkQueue::new(self.pool.config.queue_capacity));
        let feed_stop = self.pool.feed_stop.clone();
        let poll_interval = self.pool.config.poll_interval;
        let drain = self.pool.config.drain;

        let mut started = Ok(());
        for unit in self.pool.units.iter_mut() {
            started = unit.start_queue_loop(
                Arc::clone(&queue),
                tx.clone(),
                poll_interval,
                drain,
                feed_stop.clone(),
            );
            if started.is_err() {
                break;
            }
        }
        if started.is_err() {
            queue.close();
        }
        self.pool.set_state(ExecutorState::Running);

        let timer = stop.time_limit().map(|limit| {
            let feed_stop = feed_stop.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => {
                        tracing::info!(?limit, "Time limit reached, stopping feed");
                        feed_stop.cancel();
                    }
                    _ = feed_stop.cancelled() => {}
                }
            })
        });

        let feeder = started.is_ok().then(|| {
            tokio::spawn(feed(
                Arc::clone(&distribution),
                Arc::clone(&queue),
                stop.task_limit(),
                feed_stop.clone(),
            ))
        });
        let mut fed = match feeder {
            Some(handle) => handle.await.map_err(|err| {
                queue.close();
                StressError::executor(format!("feeder task failed: {err}"))
            }),
            None => Ok(FeedOutcome {
                enqueued: 0,
                error: None,
                stranded: None,
            }),
        };

        self.pool.set_state(ExecutorState::Stopping);
        let (stats, _) = self.pool.join_units(false).await;
        if let Some(timer) = timer {
            timer.abort();
        }

        let mut leftovers = self.leftovers(&queue);
        if let Some(item) = fed.as_mut().ok().and_then(|fed| fed.stranded.take()) {
            leftovers.push(ExecutionResult::abandoned(
                item.sequence,
                item.task,
                "queue closed before the task was enqueued",
            ));
        }
        if !leftovers.is_empty() {
            tracing::info!(count = leftovers.len(), "Recording unstarted queued tasks as cancelled");
        }
        for result in leftovers {
            if tx.send(result).await.is_err() {
                break;
            }
        }
        tracing::debug!(
            completed = stats.completed,
            failed = stats.failed,
            cancelled = stats.cancelled,
            "Queue workers finished"
        );

        let results = match self.pool.finish(tx, collector).await {
            Ok(results) => results,
            Err(err) => return ExecutionOutcome::failed(Vec::new(), err),
        };

        let error = match (started, fed) {
            (Err(err), _) | (Ok(()), Err(err)) => Some(err),
            (Ok(()), Ok(fed)) => match fed.error {
                Some(err) if err.is_exhausted() && fed.enqueued > 0 => None,
                other => other,
            },
        };
        ExecutionOutcome { results, error }
    }
}
