//! Coordinated, signal-driven shutdown
//!
//! One [`ShutdownCoordinator`] per process owns the process-wide stopping
//! token. Executors derive their own tokens from it, so cancelling it stops
//! every dispatch loop. The coordinator then asks each unit of the attached
//! executor to stop, waits out the grace period, and escalates to forced
//! termination if a second interrupt arrives or the grace period runs out.
//!
//! Core logic is driven by [`ShutdownCoordinator::handle_signal`];
//! [`ShutdownCoordinator::install`] maps OS signals onto it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ShutdownConfig;
use crate::error::{StressError, StressResult};
use crate::executor::ExecutorHandle;
use crate::worker::WorkerControl;

/// Signals the coordinator reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownSignal {
    /// Ctrl-C; a second one escalates to forced termination
    Interrupt,
    /// Termination request from the environment
    Terminate,
    /// Halt every worker before its next task
    Suspend,
    /// Lift a previous suspend
    Resume,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownSignal::Interrupt => "interrupt",
            ShutdownSignal::Terminate => "terminate",
            ShutdownSignal::Suspend => "suspend",
            ShutdownSignal::Resume => "resume",
        };
        f.write_str(name)
    }
}

/// What a shutdown achieved
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    /// Signal that started the shutdown
    pub signal: ShutdownSignal,

    /// Units of the attached executor
    pub workers: usize,

    /// Units that reached a quiescent state on their own
    pub stopped: usize,

    /// Units that had to be killed
    pub forced: usize,

    /// A second interrupt cut the grace period short
    pub escalated: bool,

    /// Time from the signal to the report
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// Whether every unit stopped without being killed
    pub fn is_clean(&self) -> bool {
        self.forced == 0
    }
}

/// Callback run with the report before the coordinator returns it
pub type FlushHook = Box<dyn Fn(&ShutdownReport) + Send + Sync>;

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// How long killed units get to publish their terminal state
const KILL_SETTLE: Duration = Duration::from_secs(1);

/// Process-wide shutdown coordinator
pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    stopping: CancellationToken,
    escalate: CancellationToken,
    in_progress: AtomicBool,
    executor: Mutex<Option<ExecutorHandle>>,
    flush: Mutex<Option<FlushHook>>,
    report: Mutex<Option<ShutdownReport>>,
}

impl ShutdownCoordinator {
    /// Create a coordinator
    pub fn new(config: ShutdownConfig) -> Self {
        Self {
            config,
            stopping: CancellationToken::new(),
            escalate: CancellationToken::new(),
            in_progress: AtomicBool::new(false),
            executor: Mutex::new(None),
            flush: Mutex::new(None),
            report: Mutex::new(None),
        }
    }

    /// Token every executor of this process should derive from
    pub fn stopping_token(&self) -> CancellationToken {
        self.stopping.clone()
    }

    /// Whether a shutdown has started
    pub fn is_shutting_down(&self) -> bool {
        self.stopping.is_cancelled()
    }

    /// Observe the given executor (replaces any previous one)
    pub fn attach(&self, handle: ExecutorHandle) {
        *lock(&self.executor) = Some(handle);
    }

    /// Stop observing the current executor
    pub fn detach(&self) -> Option<ExecutorHandle> {
        lock(&self.executor).take()
    }

    /// Register the hook run with the final report
    pub fn on_flush(&self, hook: impl Fn(&ShutdownReport) + Send + Sync + 'static) {
        *lock(&self.flush) = Some(Box::new(hook));
    }

    fn attached(&self) -> Option<ExecutorHandle> {
        lock(&self.executor).clone()
    }

    /// React to one signal
    ///
    /// Returns the report for the call that performed the shutdown; a
    /// repeated interrupt, a suspend or a resume return `None`.
    pub async fn handle_signal(&self, signal: ShutdownSignal) -> Option<ShutdownReport> {
        match signal {
            ShutdownSignal::Suspend => {
                self.set_halted(true);
                None
            }
            ShutdownSignal::Resume => {
                self.set_halted(false);
                None
            }
            ShutdownSignal::Interrupt | ShutdownSignal::Terminate => {
                if self.in_progress.swap(true, Ordering::SeqCst) {
                    if signal == ShutdownSignal::Interrupt {
                        tracing::warn!("Second interrupt, killing remaining workers");
                        self.escalate.cancel();
                    }
                    return None;
                }
                Some(self.shutdown(signal).await)
            }
        }
    }

    fn set_halted(&self, halted: bool) {
        let Some(handle) = self.attached() else {
            tracing::debug!(halted, "No executor attached, ignoring suspend/resume");
            return;
        };
        if halted {
            tracing::info!(workers = handle.worker_count(), "Suspending workers");
            handle.gate().halt_all();
        } else {
            tracing::info!(workers = handle.worker_count(), "Resuming workers");
            handle.gate().resume_all();
        }
    }

    async fn shutdown(&self, signal: ShutdownSignal) -> ShutdownReport {
        let started = Instant::now();
        tracing::info!(%signal, grace = ?self.config.grace_period, "Shutting down");
        self.stopping.cancel();

        let workers: Vec<WorkerControl> = self
            .attached()
            .map(|handle| handle.workers().to_vec())
            .unwrap_or_default();

        for worker in workers.iter().filter(|w| !w.is_terminal()) {
            worker.request_stop();
        }

        let grace = self.config.grace_period;
        let settled = tokio::select! {
            all = join_all(workers.iter().map(|w| w.wait_quiescent(grace))) => {
                all.into_iter().all(|quiet| quiet)
            }
            _ = self.escalate.cancelled() => false,
        };
        let escalated = self.escalate.is_cancelled();

        if !settled {
            let lingering: Vec<&WorkerControl> = workers
                .iter()
                .filter(|w| !w.state().is_quiescent())
                .collect();
            tracing::warn!(
                count = lingering.len(),
                escalated,
                "Forcing termination of lingering workers"
            );
            for worker in &lingering {
                worker.force_terminate();
            }
            join_all(lingering.iter().map(|w| w.wait_quiescent(KILL_SETTLE))).await;
        }

        let forced = workers.iter().filter(|w| w.was_forced()).count();
        let report = ShutdownReport {
            signal,
            workers: workers.len(),
            stopped: workers.len() - forced,
            forced,
            escalated,
            elapsed: started.elapsed(),
        };

        if let Some(hook) = lock(&self.flush).as_ref() {
            hook(&report);
        }
        tracing::info!(
            workers = report.workers,
            stopped = report.stopped,
            forced = report.forced,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Shutdown complete"
        );
        *lock(&self.report) = Some(report.clone());
        report
    }

    /// Route OS signals to [`handle_signal`](Self::handle_signal)
    ///
    /// Ctrl-C maps to `Interrupt`; on Unix SIGTERM, SIGTSTP and SIGCONT map
    /// to `Terminate`, `Suspend` and `Resume`. The listener keeps routing
    /// after a shutdown or an escalation; abort the returned task to stop it.
    /// The first shutdown report is available from [`report`](Self::report).
    ///
    /// # Errors
    /// [`StressError::Executor`] if signal handlers were already installed in
    /// this process, [`StressError::Io`] if a handler cannot be registered.
    pub fn install(self: &Arc<Self>) -> StressResult<JoinHandle<()>> {
        if INSTALLED.swap(true, Ordering::SeqCst) {
            return Err(StressError::executor(
                "shutdown signal handlers are already installed",
            ));
        }
        let signals = SignalStream::new()?;
        Ok(self.listen(signals))
    }

    /// Report of the shutdown this coordinator performed, once it finished
    pub fn report(&self) -> Option<ShutdownReport> {
        lock(&self.report).clone()
    }

    fn listen<S: SignalSource + 'static>(self: &Arc<Self>, mut signals: S) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                tracing::debug!(%signal, "Signal received");
                // Own task per signal, so an escalation can overtake a pending shutdown.
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move { coordinator.handle_signal(signal).await });
            }
            tracing::debug!("Signal sources closed");
        })
    }
}

impl fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("config", &self.config)
            .field("shutting_down", &self.is_shutting_down())
            .field("attached", &self.attached().is_some())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Where the listener reads signals from
#[async_trait]
trait SignalSource: Send {
    /// Next signal; `None` once the source is closed
    async fn recv(&mut self) -> Option<ShutdownSignal>;
}

/// OS signal sources mapped onto [`ShutdownSignal`]
struct SignalStream {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    suspend: tokio::signal::unix::Signal,
    #[cfg(unix)]
    resume: tokio::signal::unix::Signal,
}

impl SignalStream {
    #[cfg(unix)]
    fn new() -> StressResult<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            suspend: signal(SignalKind::from_raw(libc::SIGTSTP))?,
            resume: signal(SignalKind::from_raw(libc::SIGCONT))?,
        })
    }

    #[cfg(not(unix))]
    fn new() -> StressResult<Self> {
        Ok(Self {})
    }

}

#[async_trait]
impl SignalSource for SignalStream {
    #[cfg(unix)]
    async fn recv(&mut self) -> Option<ShutdownSignal> {
        tokio::select! {
            interrupted = tokio::signal::ctrl_c() => interrupted.ok().map(|_| ShutdownSignal::Interrupt),
            received = self.terminate.recv() => received.map(|_| ShutdownSignal::Terminate),
            received = self.suspend.recv() => received.map(|_| ShutdownSignal::Suspend),
            received = self.resume.recv() => received.map(|_| ShutdownSignal::Resume),
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> Option<ShutdownSignal> {
        tokio::signal::ctrl_c()
            .await
            .ok()
            .map(|_| ShutdownSignal::Interrupt)
    }
}
