//! Pool-wide admission gate
//!
//! Worker `i` may start its next task only while `i < active_limit` and the
//! gate is not halted. The stress controller moves the limit; suspend and
//! resume signals toggle the halt. In-flight tasks are never interrupted by
//! the gate: it is consulted only before a start or a queue pull.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GateState {
    active_limit: usize,
    halted: bool,
}

impl GateState {
    fn admits(&self, index: usize) -> bool {
        !self.halted && index < self.active_limit
    }
}

/// Shared admission gate for a worker pool
#[derive(Debug, Clone)]
pub struct PauseGate {
    tx: Arc<watch::Sender<GateState>>,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::open()
    }
}

impl PauseGate {
    /// A gate that admits every worker
    pub fn open() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// A gate that admits workers `0..limit`
    pub fn with_limit(limit: usize) -> Self {
        let (tx, _rx) = watch::channel(GateState {
            active_limit: limit,
            halted: false,
        });
        Self { tx: Arc::new(tx) }
    }

    /// Change how many workers may start tasks
    pub fn set_active_limit(&self, limit: usize) {
        self.tx.send_if_modified(|state| {
            let changed = state.active_limit != limit;
            state.active_limit = limit;
            changed
        });
    }

    /// Current active limit
    pub fn active_limit(&self) -> usize {
        self.tx.borrow().active_limit
    }

    /// Block every worker before its next start
    pub fn halt_all(&self) {
        self.set_halted(true);
    }

    /// Lift a previous [`halt_all`](Self::halt_all)
    pub fn resume_all(&self) {
        self.set_halted(false);
    }

    /// Whether the gate is halted
    pub fn is_halted(&self) -> bool {
        self.tx.borrow().halted
    }

    /// Whether worker `index` may start a task right now
    pub fn admits(&self, index: usize) -> bool {
        self.tx.borrow().admits(index)
    }

    /// Wait until worker `index` is admitted
    ///
    /// Returns `false` if `stop` fires first.
    pub async fn wait_turn(&self, index: usize, stop: &CancellationToken) -> bool {
        let mut rx = self.tx.subscribe();
        loop {
            if stop.is_cancelled() {
                return false;
            }
            let admitted = rx.borrow_and_update().admits(index);
            if admitted {
                return true;
            }
            tokio::select! {
                biased;
                _ = stop.cancelled() => return false,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return !stop.is_cancelled();
                    }
                }
            }
        }
    }

    fn set_halted(&self, halted: bool) {
        self.tx.send_if_modified(|state| {
            let changed = state.halted != halted;
            state.halted = halted;
            changed
        });
    }
}
