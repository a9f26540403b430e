//! Collaborator traits: task runners, tool managers and phase loggers
//!
//! The engine never knows what a task does. Command semantics arrive through
//! [`TaskRunner`], phase lifecycle and error sinking through [`ToolManager`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::context::ToolData;
use crate::error::StressResult;
use crate::os::AffinityMask;
use crate::task::{ExecutionResult, TaskDescriptor, TaskOutput};

// ============================================================================
// Stop condition
// ============================================================================

/// When an executor stops pulling new work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCondition {
    /// Run exactly N tasks
    TaskCount(usize),

    /// Run for the specified duration
    Duration(Duration),

    /// Run until explicitly stopped
    Indefinite,
}

impl StopCondition {
    /// Task limit, if any
    pub fn task_limit(&self) -> Option<usize> {
        match self {
            StopCondition::TaskCount(n) => Some(*n),
            _ => None,
        }
    }

    /// Time limit, if any
    pub fn time_limit(&self) -> Option<Duration> {
        match self {
            StopCondition::Duration(d) => Some(*d),
            _ => None,
        }
    }
}

impl Default for StopCondition {
    fn default() -> Self {
        StopCondition::TaskCount(1)
    }
}

// ============================================================================
// Task runner
// ============================================================================

/// Why a task did not succeed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    /// The task ran and reported a failure
    #[error("task failed: {0}")]
    Failed(String),

    /// The underlying command exited with a non-zero code
    #[error("command exited with code {code}: {message}")]
    ExitCode {
        /// Exit code
        code: i32,
        /// Captured diagnostic output
        message: String,
    },

    /// The task observed a stop request and bailed out
    #[error("task cancelled")]
    Cancelled,
}

impl TaskError {
    /// Failure with a message
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Per-run context handed to a [`TaskRunner`]
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Worker running the task
    pub worker_id: usize,

    /// Position of the task in distribution order
    pub sequence: u64,

    /// CPUs the worker is placed on
    pub affinity: Option<AffinityMask>,

    stop: CancellationToken,
}

impl TaskContext {
    /// Create a context
    pub fn new(
        worker_id: usize,
        sequence: u64,
        affinity: Option<AffinityMask>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            worker_id,
            sequence,
            affinity,
            stop,
        }
    }

    /// Whether a cooperative stop has been requested
    ///
    /// Long-running tasks should poll this at safe points.
    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Resolves once a stop has been requested
    pub async fn stopped(&self) {
        self.stop.cancelled().await
    }
}

/// Executes task descriptors
///
/// Supplied by the tool manager. Returning `Err` or panicking marks the task
/// as failed; neither reaches the executor as control flow.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Runner name, used in logs
    fn name(&self) -> &str;

    /// Run one task to completion
    async fn run(&self, task: &TaskDescriptor, ctx: &TaskContext) -> Result<TaskOutput, TaskError>;
}

// ============================================================================
// Phases and phase logging
// ============================================================================

/// Runnable phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Tool environment setup
    Setup,
    /// Tool initialization
    Initialization,
    /// Core execution
    Execution,
    /// Result post-processing
    PostExecution,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Setup => "SETUP",
            Phase::Initialization => "INITIALIZATION",
            Phase::Execution => "EXECUTION",
            Phase::PostExecution => "POST_EXECUTION",
        };
        f.write_str(name)
    }
}

/// Phase lifecycle logger exposed by a tool manager
pub trait PhaseLogger: Send + Sync {
    /// A run is starting
    fn start_execution(&self);

    /// A phase is starting
    fn start_phase(&self, phase: Phase);

    /// A phase finished
    fn end_phase(&self, phase: Phase);

    /// Setup progress message
    fn log_setup(&self, message: &str);

    /// Initialization progress message
    fn log_initialization(&self, message: &str);

    /// Execution progress message
    fn log_execution(&self, message: &str);

    /// The run is over
    fn end_execution(&self, success: bool, exit_code: i32);
}

/// [`PhaseLogger`] that emits `tracing` events
#[derive(Debug, Clone)]
pub struct TracingPhaseLogger {
    tool: String,
}

impl TracingPhaseLogger {
    /// Logger for the named tool
    pub fn new(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }
}

impl PhaseLogger for TracingPhaseLogger {
    fn start_execution(&self) {
        tracing::info!(tool = %self.tool, "Starting execution");
    }

    fn start_phase(&self, phase: Phase) {
        tracing::info!(tool = %self.tool, %phase, "Phase started");
    }

    fn end_phase(&self, phase: Phase) {
        tracing::info!(tool = %self.tool, %phase, "Phase finished");
    }

    fn log_setup(&self, message: &str) {
        tracing::info!(tool = %self.tool, phase = %Phase::Setup, "{message}");
    }

    fn log_initialization(&self, message: &str) {
        tracing::info!(tool = %self.tool, phase = %Phase::Initialization, "{message}");
    }

    fn log_execution(&self, message: &str) {
        tracing::info!(tool = %self.tool, phase = %Phase::Execution, "{message}");
    }

    fn end_execution(&self, success: bool, exit_code: i32) {
        if success {
            tracing::info!(tool = %self.tool, exit_code, "Execution finished");
        } else {
            tracing::warn!(tool = %self.tool, exit_code, "Execution finished with errors");
        }
    }
}

// ============================================================================
// Tool manager
// ============================================================================

/// Phase-lifecycle and error-sink collaborator of a [`Runnable`](crate::runnable::Runnable)
#[async_trait]
pub trait ToolManager: Send + Sync {
    /// Tool name
    fn name(&self) -> &str;

    /// Phase logger
    fn logger(&self) -> &dyn PhaseLogger;

    /// Shared key/value store for this run
    fn tool_data(&self) -> &ToolData;

    /// Command semantics for the executor's worker units
    fn runner(&self) -> Arc<dyn TaskRunner>;

    /// Prepare the tool environment
    async fn setup(&self) -> StressResult<()>;

    /// Initialize the tool once setup is done
    async fn initialize(&self) -> StressResult<()>;

    /// Turn collected results into a process exit code
    ///
    /// The default treats any failed task as exit code 1.
    async fn post_process(&self, results: &[ExecutionResult]) -> StressResult<i32> {
        Ok(if results.iter().any(ExecutionResult::is_failure) {
            1
        } else {
            0
        })
    }
}
