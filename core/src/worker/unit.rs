//! Supervised worker unit
//!
//! Each `start` spawns a supervisor task. The supervisor spawns the runner's
//! future as a child task of its own so that errors and panics surface as a
//! [`JoinError`](tokio::task::JoinError) instead of unwinding into the
//! executor, and so that a forced termination can abort it.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::DrainPolicy;
use crate::error::{StressError, StressResult};
use crate::os::{AffinityMask, OsAbstraction, WorkerHandle};
use crate::task::{ExecutionResult, TaskDescriptor, TaskOutput};
use crate::traits::{TaskContext, TaskError, TaskRunner};

use super::gate::PauseGate;
use super::queue::{Popped, QueuedTask, WorkQueue};
use super::rate_limiter::TaskRateLimiter;
use super::state::WorkerState;
use super::stats::WorkerStats;

#[derive(Debug, Clone)]
struct Signals {
    stop: CancellationToken,
    kill: CancellationToken,
}

/// State shared between a unit and its [`WorkerControl`] views
#[derive(Debug)]
struct Shared {
    id: usize,
    parent: CancellationToken,
    signals: Mutex<Signals>,
    state: watch::Sender<WorkerState>,
    forced: AtomicBool,
}

impl Shared {
    fn signals(&self) -> Signals {
        self.lock_signals().clone()
    }

    fn lock_signals(&self) -> MutexGuard<'_, Signals> {
        self.signals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }

    fn state(&self) -> WorkerState {
        *self.state.borrow()
    }
}

/// Cloneable stop/kill/observe handle for one unit
///
/// Held by the executor's registry and by the shutdown coordinator. It can
/// only read the unit's state; transitions stay with the unit's supervisor.
#[derive(Debug, Clone)]
pub struct WorkerControl {
    shared: Arc<Shared>,
}

impl WorkerControl {
    /// Worker identifier
    pub fn id(&self) -> usize {
        self.shared.id
    }

    /// Current state
    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    /// Whether the unit is `Stopped` or `Failed`
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Ask the unit to stop cooperatively (idempotent)
    pub fn request_stop(&self) {
        let signals = self.shared.signals();
        if !signals.stop.is_cancelled() {
            tracing::debug!(worker_id = self.id(), "Stop requested");
            signals.stop.cancel();
        }
    }

    /// Kill the unit's in-flight task without waiting for its grace period
    pub fn force_terminate(&self) {
        let signals = self.shared.signals();
        signals.stop.cancel();
        signals.kill.cancel();
    }

    /// Wait until nothing is executing on the unit
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_quiescent(&self, timeout: Duration) -> bool {
        let mut rx = self.shared.state.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(WorkerState::is_quiescent)).await;
        matches!(waited, Ok(Ok(_)))
    }

    /// Whether the unit's last run ended in a forced termination
    pub fn was_forced(&self) -> bool {
        self.shared.forced.load(Ordering::SeqCst)
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.shared.state.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    TaskFailed,
    Cancelled,
    Killed,
}

/// Everything a supervisor task needs, detached from the unit
#[derive(Clone)]
struct Supervisor {
    shared: Arc<Shared>,
    runner: Arc<dyn TaskRunner>,
    os: Arc<dyn OsAbstraction>,
    affinity: Option<AffinityMask>,
    gate: PauseGate,
    limiter: Arc<TaskRateLimiter>,
    grace: Duration,
    signals: Signals,
}

impl Supervisor {
    fn id(&self) -> usize {
        self.shared.id
    }

    fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            worker_id: self.id(),
        }
    }

    fn stopped(&self) -> bool {
        self.signals.stop.is_cancelled()
    }

    async fn wait_gate(&self) -> bool {
        !self.stopped() && self.gate.wait_turn(self.id(), &self.signals.stop).await
    }

    /// Like `wait_gate`, but gives up once the queue is closed and empty
    async fn wait_gate_while_queued(
        &self,
        queue: &WorkQueue<QueuedTask>,
        poll_interval: Duration,
    ) -> bool {
        loop {
            tokio::select! {
                admitted = self.wait_gate() => return admitted,
                _ = tokio::time::sleep(poll_interval) => {
                    if queue.is_closed() && queue.is_empty() {
                        return false;
                    }
                }
            }
        }
    }

    async fn throttle(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.signals.stop.cancelled() => false,
            _ = self.limiter.wait() => true,
        }
    }

    fn not_started(&self, sequence: u64, task: TaskDescriptor) -> (ExecutionResult, Outcome) {
        let result = ExecutionResult::cancelled(
            sequence,
            self.id(),
            task,
            "stop requested before start",
            Utc::now(),
        );
        (result, Outcome::Cancelled)
    }

    async fn execute(&self, sequence: u64, task: TaskDescriptor) -> (ExecutionResult, Outcome) {
        let started = Utc::now();
        let ctx = TaskContext::new(
            self.id(),
            sequence,
            self.affinity.clone(),
            self.signals.stop.clone(),
        );
        let runner = Arc::clone(&self.runner);
        let job_task = task.clone();
        let mut job = tokio::spawn(async move { runner.run(&job_task, &ctx).await });

        tracing::debug!(worker_id = self.id(), sequence, task = %task.label(), "Task started");

        let finished = tokio::select! {
            joined = &mut job => Some(joined),
            _ = self.signals.stop.cancelled() => None,
        };
        let joined = match finished {
            Some(joined) => joined,
            None => {
                self.shared.set_state(WorkerState::Stopping);
                self.os.terminate(self.handle(), false);
                let within_grace = tokio::select! {
                    joined = &mut job => Some(joined),
                    _ = tokio::time::sleep(self.grace) => None,
                    _ = self.signals.kill.cancelled() => None,
                };
                match within_grace {
                    Some(joined) => joined,
                    None => return self.killed(job, sequence, task, started),
                }
            }
        };

        match joined {
            Ok(Ok(output)) => (
                ExecutionResult::success(sequence, self.id(), task, output, started),
                Outcome::Completed,
            ),
            Ok(Err(TaskError::Cancelled)) => (
                ExecutionResult::cancelled(sequence, self.id(), task, "task cancelled", started),
                Outcome::Cancelled,
            ),
            Ok(Err(err)) => {
                tracing::warn!(worker_id = self.id(), sequence, error = %err, "Task failed");
                let code = match &err {
                    TaskError::ExitCode { code, .. } => Some(*code),
                    _ => None,
                };
                let result =
                    ExecutionResult::failure(sequence, self.id(), task, err.to_string(), started)
                        .with_exit_code(code);
                (result, Outcome::TaskFailed)
            }
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    format!("task panicked: {}", panic_message(join_err.into_panic()))
                } else {
                    format!("task aborted: {join_err}")
                };
                tracing::error!(worker_id = self.id(), sequence, %message, "Task crashed");
                (
                    ExecutionResult::failure(sequence, self.id(), task, message, started),
                    Outcome::TaskFailed,
                )
            }
        }
    }

    fn killed(
        &self,
        job: JoinHandle<Result<TaskOutput, TaskError>>,
        sequence: u64,
        task: TaskDescriptor,
        started: DateTime<Utc>,
    ) -> (ExecutionResult, Outcome) {
        job.abort();
        self.os.terminate(self.handle(), true);
        self.shared.forced.store(true, Ordering::SeqCst);

        let err = StressError::ForcedTermination {
            worker_id: self.id(),
            grace: self.grace,
        };
        tracing::warn!(worker_id = self.id(), sequence, error = %err, "Worker killed");
        (
            ExecutionResult::failure(sequence, self.id(), task, err.to_string(), started),
            Outcome::Killed,
        )
    }

    async fn report(&self, sink: &mpsc::Sender<ExecutionResult>, result: ExecutionResult) -> bool {
        if sink.send(result).await.is_err() {
            tracing::debug!(worker_id = self.id(), "Result sink closed");
            return false;
        }
        true
    }

    async fn run_single(
        self,
        sequence: u64,
        task: TaskDescriptor,
        sink: mpsc::Sender<ExecutionResult>,
    ) -> WorkerStats {
        let mut stats = WorkerStats::new();
        stats.start();

        let (result, outcome) = if self.wait_gate().await && self.throttle().await {
            self.execute(sequence, task).await
        } else {
            self.not_started(sequence, task)
        };

        stats.record(&result);
        if outcome == Outcome::Killed {
            stats.record_forced();
        }
        self.report(&sink, result).await;

        self.shared.set_state(match outcome {
            Outcome::Completed | Outcome::Cancelled => WorkerState::Stopped,
            Outcome::TaskFailed | Outcome::Killed => WorkerState::Failed,
        });
        stats.stop();
        stats
    }

    async fn run_queue(
        self,
        queue: Arc<WorkQueue<QueuedTask>>,
        sink: mpsc::Sender<ExecutionResult>,
        poll_interval: Duration,
        abandon: Option<CancellationToken>,
    ) -> WorkerStats {
        let mut stats = WorkerStats::new();
        stats.start();
        tracing::debug!(worker_id = self.id(), "Queue loop started");

        let mut killed = false;
        loop {
            if abandon.as_ref().is_some_and(CancellationToken::is_cancelled) {
                break;
            }
            // Paused workers wait here, before pulling, never while holding an item.
            if !self.wait_gate_while_queued(&queue, poll_interval).await {
                break;
            }

            let popped = tokio::select! {
                biased;
                _ = self.signals.stop.cancelled() => break,
                popped = queue.pop(poll_interval) => popped,
            };
            let item = match popped {
                Popped::Item(item) => item,
                Popped::Empty => continue,
                Popped::Closed => break,
            };

            let (result, outcome) = if self.throttle().await {
                self.execute(item.sequence, item.task).await
            } else {
                self.not_started(item.sequence, item.task)
            };

            stats.record(&result);
            if !self.report(&sink, result).await {
                break;
            }
            if outcome == Outcome::Killed {
                stats.record_forced();
                killed = true;
                break;
            }
        }

        self.shared.set_state(if killed {
            WorkerState::Failed
        } else {
            WorkerState::Stopped
        });
        stats.stop();
        tracing::debug!(
            worker_id = self.id(),
            completed = stats.completed,
            failed = stats.failed,
            cancelled = stats.cancelled,
            "Queue loop finished"
        );
        stats
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "non-string panic payload".to_string(),
        },
    }
}

/// One supervised execution context
///
/// Owned by exactly one executor. Other parties observe it through
/// [`WorkerControl`].
pub struct WorkerUnit {
    shared: Arc<Shared>,
    runner: Arc<dyn TaskRunner>,
    os: Arc<dyn OsAbstraction>,
    affinity: Option<AffinityMask>,
    gate: PauseGate,
    limiter: Arc<TaskRateLimiter>,
    grace: Duration,
    handle: Option<JoinHandle<WorkerStats>>,
}

impl WorkerUnit {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: usize,
        runner: Arc<dyn TaskRunner>,
        os: Arc<dyn OsAbstraction>,
        affinity: Option<AffinityMask>,
        gate: PauseGate,
        limiter: Arc<TaskRateLimiter>,
        grace: Duration,
        parent: CancellationToken,
    ) -> Self {
        let (state, _rx) = watch::channel(WorkerState::Idle);
        let signals = Signals {
            stop: parent.child_token(),
            kill: CancellationToken::new(),
        };
        Self {
            shared: Arc::new(Shared {
                id,
                parent,
                signals: Mutex::new(signals),
                state,
                forced: AtomicBool::new(false),
            }),
            runner,
            os,
            affinity,
            gate,
            limiter,
            grace,
            handle: None,
        }
    }

    /// Worker identifier
    pub fn id(&self) -> usize {
        self.shared.id
    }

    /// Current state
    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    /// Whether a supervisor has been started and not yet joined
    pub fn is_joinable(&self) -> bool {
        self.handle.is_some()
    }

    /// CPUs the unit is placed on
    pub fn affinity(&self) -> Option<&AffinityMask> {
        self.affinity.as_ref()
    }

    /// A control handle sharing this unit's signals and state
    pub fn control(&self) -> WorkerControl {
        WorkerControl {
            shared: Arc::clone(&self.shared),
        }
    }

    fn supervisor(&self) -> Supervisor {
        Supervisor {
            shared: Arc::clone(&self.shared),
            runner: Arc::clone(&self.runner),
            os: Arc::clone(&self.os),
            affinity: self.affinity.clone(),
            gate: self.gate.clone(),
            limiter: Arc::clone(&self.limiter),
            grace: self.grace,
            signals: self.shared.signals(),
        }
    }

    fn begin(&self) -> StressResult<()> {
        let current = self.state();
        if current != WorkerState::Idle {
            return Err(StressError::executor(format!(
                "worker {} cannot start while {current}",
                self.id()
            )));
        }
        self.shared.forced.store(false, Ordering::SeqCst);
        self.shared.set_state(WorkerState::Running);
        Ok(())
    }

    /// Run one task under supervision
    ///
    /// Returns immediately; the result arrives on `sink`. The stop signal
    /// is checked before the task starts.
    ///
    /// # Errors
    /// Returns [`StressError::Executor`] if the unit is not `Idle`.
    pub fn start(
        &mut self,
        task: TaskDescriptor,
        sequence: u64,
        sink: mpsc::Sender<ExecutionResult>,
    ) -> StressResult<()> {
        self.begin()?;
        let supervisor = self.supervisor();
        self.handle = Some(tokio::spawn(supervisor.run_single(sequence, task, sink)));
        Ok(())
    }

    /// Run the pull-execute-report loop over `queue`
    ///
    /// The loop ends when the queue is closed and empty, when the unit is
    /// stopped, or (under [`DrainPolicy::AbandonImmediately`]) as soon as
    /// `feed_stop` fires.
    ///
    /// # Errors
    /// Returns [`StressError::Executor`] if the unit is not `Idle`.
    pub fn start_queue_loop(
        &mut self,
        queue: Arc<WorkQueue<QueuedTask>>,
        sink: mpsc::Sender<ExecutionResult>,
        poll_interval: Duration,
        drain: DrainPolicy,
        feed_stop: CancellationToken,
    ) -> StressResult<()> {
        self.begin()?;
        let abandon = match drain {
            DrainPolicy::DrainToEmpty => None,
            DrainPolicy::AbandonImmediately => Some(feed_stop),
        };
        let supervisor = self.supervisor();
        self.handle = Some(tokio::spawn(supervisor.run_queue(
            queue,
            sink,
            poll_interval,
            abandon,
        )));
        Ok(())
    }

    /// Wait for the supervisor to finish
    ///
    /// # Errors
    /// [`StressError::JoinTimeout`] if `timeout` elapses (the unit keeps
    /// running and can be joined again), [`StressError::Executor`] if the
    /// unit was never started or its supervisor was aborted.
    pub async fn join(&mut self, timeout: Duration) -> StressResult<WorkerStats> {
        let id = self.id();
        let Some(handle) = self.handle.as_mut() else {
            return Err(StressError::executor(format!("worker {id} was never started")));
        };
        let joined = match tokio::time::timeout(timeout, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                return Err(StressError::JoinTimeout {
                    worker_id: id,
                    timeout,
                })
            }
        };
        self.handle = None;
        joined.map_err(|err| {
            self.shared.set_state(WorkerState::Failed);
            StressError::executor(format!("worker {id} supervisor ended abnormally: {err}"))
        })
    }

    /// Wait for the supervisor with no deadline
    ///
    /// Bounded in practice by the task itself plus the grace period once a
    /// stop has been requested.
    ///
    /// # Errors
    /// See [`join`](Self::join).
    pub async fn wait(&mut self) -> StressResult<WorkerStats> {
        self.join(Duration::MAX).await
    }

    /// Ask the unit to stop cooperatively (idempotent)
    pub fn request_stop(&self) {
        self.control().request_stop();
    }

    /// Return a finished unit to `Idle` for reuse
    ///
    /// A cancelled stop signal is replaced by a fresh child of the
    /// executor's token, so a stopped executor still yields stopped units.
    ///
    /// # Errors
    /// Returns [`StressError::Executor`] while the unit is running or has
    /// not been joined.
    pub fn reset(&mut self) -> StressResult<()> {
        let current = self.state();
        if !current.is_quiescent() || self.handle.is_some() {
            return Err(StressError::executor(format!(
                "worker {} cannot be reset while {current}",
                self.id()
            )));
        }
        {
            let mut signals = self.shared.lock_signals();
            if signals.stop.is_cancelled() {
                signals.stop = self.shared.parent.child_token();
            }
            if signals.kill.is_cancelled() {
                signals.kill = CancellationToken::new();
            }
        }
        self.shared.set_state(WorkerState::Idle);
        Ok(())
    }
}

impl std::fmt::Debug for WorkerUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerUnit")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("runner", &self.runner.name())
            .field("affinity", &self.affinity)
            .field("grace", &self.grace)
            .finish()
    }
}
