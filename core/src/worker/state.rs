//! Worker unit lifecycle states

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`WorkerUnit`](super::WorkerUnit)
///
/// ```text
/// Idle -> Running -> Stopped
///            |  \--> Failed
///            v
///         Stopping -> Stopped | Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    /// Not started, or reset after a finished wave
    #[default]
    Idle,
    /// Executing (or waiting to execute) work
    Running,
    /// A stop was requested and the in-flight task is winding down
    Stopping,
    /// Finished cleanly
    Stopped,
    /// Finished with a task failure, panic or forced termination
    Failed,
}

impl WorkerState {
    /// `Stopped` or `Failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Stopped | WorkerState::Failed)
    }

    /// Nothing is executing: idle or terminal
    pub fn is_quiescent(&self) -> bool {
        matches!(self, WorkerState::Idle) || self.is_terminal()
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Idle => "IDLE",
            WorkerState::Running => "RUNNING",
            WorkerState::Stopping => "STOPPING",
            WorkerState::Stopped => "STOPPED",
            WorkerState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}
