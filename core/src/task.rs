//! Task descriptors and execution results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One unit of work: a command plus its parameters
///
/// Descriptors are opaque to the engine. They have no identity beyond value
/// equality and are freely reused across distribution cycles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Command or algorithm name
    pub command: String,

    /// Command parameters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl TaskDescriptor {
    /// Create a descriptor without parameters
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
        }
    }

    /// Append one parameter
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several parameters
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Command line rendering, used in logs
    pub fn label(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

impl From<&str> for TaskDescriptor {
    fn from(command: &str) -> Self {
        Self::new(command)
    }
}

/// Outcome status of one task run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task completed successfully
    Success,
    /// Task returned an error, panicked, or was forcibly terminated
    Failure,
    /// Task was stopped cooperatively or never started because of a stop
    Cancelled,
}

impl TaskStatus {
    /// Whether this is a success
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Success)
    }
}

/// Value a task runner returns on success
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    /// Optional numeric payload (bandwidth, iterations, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<f64>,

    /// Exit code reported by the underlying command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl TaskOutput {
    /// Output carrying a metric
    pub fn with_metric(metric: f64) -> Self {
        Self {
            metric: Some(metric),
            exit_code: None,
        }
    }

    /// Output carrying an exit code
    pub fn with_exit_code(code: i32) -> Self {
        Self {
            metric: None,
            exit_code: Some(code),
        }
    }
}

/// Recorded outcome of running one [`TaskDescriptor`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Position of the descriptor in distribution order for this phase
    pub sequence: u64,

    /// Worker unit that ran (or would have run) the task
    ///
    /// `None` for queued descriptors that never reached a worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<usize>,

    /// The descriptor
    pub task: TaskDescriptor,

    /// Outcome status
    pub status: TaskStatus,

    /// Error message for failed or cancelled tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Optional numeric payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<f64>,

    /// Exit code of the underlying command, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// When the task started
    pub started_at: DateTime<Utc>,

    /// When the task reached its outcome
    pub ended_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Successful result
    pub fn success(
        sequence: u64,
        worker_id: usize,
        task: TaskDescriptor,
        output: TaskOutput,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sequence,
            worker_id: Some(worker_id),
            task,
            status: TaskStatus::Success,
            error: None,
            metric: output.metric,
            exit_code: output.exit_code,
            started_at,
            ended_at: Utc::now(),
        }
    }

    /// Failed result
    pub fn failure(
        sequence: u64,
        worker_id: usize,
        task: TaskDescriptor,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sequence,
            worker_id: Some(worker_id),
            task,
            status: TaskStatus::Failure,
            error: Some(error.into()),
            metric: None,
            exit_code: None,
            started_at,
            ended_at: Utc::now(),
        }
    }

    /// Cancelled result
    pub fn cancelled(
        sequence: u64,
        worker_id: usize,
        task: TaskDescriptor,
        reason: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sequence,
            worker_id: Some(worker_id),
            task,
            status: TaskStatus::Cancelled,
            error: Some(reason.into()),
            metric: None,
            exit_code: None,
            started_at,
            ended_at: Utc::now(),
        }
    }

    /// Cancelled result for a descriptor no worker picked up
    pub fn abandoned(sequence: u64, task: TaskDescriptor, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            sequence,
            worker_id: None,
            task,
            status: TaskStatus::Cancelled,
            error: Some(reason.into()),
            metric: None,
            exit_code: None,
            started_at: now,
            ended_at: now,
        }
    }

    /// Attach an exit code
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    /// Check if the task succeeded
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Check if the task failed
    pub fn is_failure(&self) -> bool {
        self.status == TaskStatus::Failure
    }

    /// Wall time between start and end
    pub fn duration(&self) -> std::time::Duration {
        (self.ended_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}
