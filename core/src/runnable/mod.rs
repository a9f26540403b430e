//! Phase-driven runnables
//!
//! A [`Runnable`] binds a [`ToolManager`], a [`Distribution`] and a
//! [`TaskExecutor`] and drives them through
//! `Created → Setup → Initialized → Executing → {Completed, Failed}`.
//! The first phase error stops progression and is recorded once into the
//! tool's [`ToolData`](crate::context::ToolData); post-processing and the
//! closing log call always run. [`StressVariableRunnable`] adds sine-wave
//! modulation of the active worker count during the execution phase.
//!
//! # Example
//!
//! ```ignore
//! let executor = ExecutorBuilder::new()
//!     .config(PoolConfig::new(4))
//!     .runner(tool.runner())
//!     .build()?;
//!
//! let mut runnable = Runnable::new(tool, distribution, executor, StopCondition::TaskCount(100));
//! let report = runnable.execute().await;
//! std::process::exit(report.exit_code);
//! ```

mod stress;

pub use stress::{StressController, StressProfile};

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::config::StressConfig;
use crate::context::keys;
use crate::distribution::Distribution;
use crate::error::{StressError, StressResult};
use crate::executor::{summarize, ExecutorHandle, ResultSummary, TaskExecutor};
use crate::task::ExecutionResult;
use crate::traits::{Phase, StopCondition, ToolManager};

/// Runnable lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnableState {
    /// Nothing has run yet
    #[default]
    Created,
    /// Tool setup in progress
    Setup,
    /// Setup and initialization done
    Initialized,
    /// Execution phase in progress
    Executing,
    /// Every phase succeeded
    Completed,
    /// A phase failed
    Failed,
}

impl RunnableState {
    /// Whether the runnable has finished, successfully or not
    pub fn is_finished(&self) -> bool {
        matches!(self, RunnableState::Completed | RunnableState::Failed)
    }
}

impl fmt::Display for RunnableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunnableState::Created => "CREATED",
            RunnableState::Setup => "SETUP",
            RunnableState::Initialized => "INITIALIZED",
            RunnableState::Executing => "EXECUTING",
            RunnableState::Completed => "COMPLETED",
            RunnableState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Outcome of [`Runnable::execute`]
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Final state
    pub state: RunnableState,

    /// Results in distribution order (empty if execution never ran)
    pub results: Vec<ExecutionResult>,

    /// Aggregated view of `results`
    pub summary: ResultSummary,

    /// Message of the first phase failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Process exit code from post-processing
    pub exit_code: i32,
}

impl RunReport {
    /// Whether every phase succeeded and the exit code is zero
    pub fn is_success(&self) -> bool {
        self.state == RunnableState::Completed && self.exit_code == 0
    }
}

/// Drives one tool run through its phases
pub struct Runnable {
    tool: Arc<dyn ToolManager>,
    distribution: Arc<dyn Distribution>,
    executor: Box<dyn TaskExecutor>,
    stop: StopCondition,
    state: RunnableState,
}

impl Runnable {
    /// Bind a tool, a distribution and an executor
    pub fn new(
        tool: Arc<dyn ToolManager>,
        distribution: Arc<dyn Distribution>,
        executor: Box<dyn TaskExecutor>,
        stop: StopCondition,
    ) -> Self {
        Self {
            tool,
            distribution,
            executor,
            stop,
            state: RunnableState::Created,
        }
    }

    /// Current state
    pub fn state(&self) -> RunnableState {
        self.state
    }

    /// Handle of the executor, for the shutdown coordinator
    pub fn executor_handle(&self) -> ExecutorHandle {
        self.executor.handle()
    }

    /// The bound tool manager
    pub fn tool(&self) -> &Arc<dyn ToolManager> {
        &self.tool
    }

    /// Run every phase
    ///
    /// Phase errors are reported through the returned [`RunReport`] and the
    /// tool data, never as an `Err`.
    pub async fn execute(&mut self) -> RunReport {
        self.drive(None).await
    }

    async fn drive(&mut self, stress: Option<&StressConfig>) -> RunReport {
        let tool = Arc::clone(&self.tool);
        let logger = tool.logger();

        if self.state != RunnableState::Created {
            let err = StressError::executor(format!("runnable already ran (state {})", self.state));
            tracing::error!(tool = tool.name(), error = %err, "Refusing to run twice");
            return RunReport {
                state: RunnableState::Failed,
                results: Vec::new(),
                summary: ResultSummary::default(),
                error: Some(err.to_string()),
                exit_code: 1,
            };
        }

        logger.start_execution();
        let mut results = Vec::new();
        let mut error = match self.run_phases(stress, &mut results).await {
            Ok(()) => None,
            Err(err) => Some(self.fail(err)),
        };

        logger.start_phase(Phase::PostExecution);
        let mut exit_code = match tool.post_process(&results).await {
            Ok(code) => code,
            Err(err) => {
                let message = self.fail(err.in_phase(Phase::PostExecution));
                error.get_or_insert(message);
                1
            }
        };
        logger.end_phase(Phase::PostExecution);

        if error.is_some() {
            exit_code = exit_code.max(1);
        } else {
            self.state = RunnableState::Completed;
        }

        let success = error.is_none() && exit_code == 0;
        logger.end_execution(success, exit_code);

        RunReport {
            state: self.state,
            summary: summarize(&results),
            results,
            error,
            exit_code,
        }
    }

    /// Log and record a phase error; only the first one reaches the tool data
    fn fail(&mut self, err: StressError) -> String {
        let message = err.to_string();
        tracing::error!(tool = self.tool.name(), state = %self.state, error = %message, "Run failed");
        let data = self.tool.tool_data();
        if data.execution_error().is_none() {
            data.record_execution_error(message.clone());
        }
        self.state = RunnableState::Failed;
        message
    }

    async fn phase<T, F>(&mut self, phase: Phase, entering: RunnableState, work: F) -> StressResult<T>
    where
        F: Future<Output = StressResult<T>>,
    {
        self.state = entering;
        let logger = self.tool.logger();
        logger.start_phase(phase);
        let outcome = work.await.map_err(|err| err.in_phase(phase));
        if outcome.is_ok() {
            logger.end_phase(phase);
        }
        outcome
    }

    async fn run_phases(
        &mut self,
        stress: Option<&StressConfig>,
        results: &mut Vec<ExecutionResult>,
    ) -> StressResult<()> {
        let tool = Arc::clone(&self.tool);

        self.phase(Phase::Setup, RunnableState::Setup, async {
            tool.logger().log_setup("Preparing tool environment");
            tool.setup().await
        })
        .await?;

        self.phase(Phase::Initialization, RunnableState::Setup, async {
            tool.logger().log_initialization("Initializing tool");
            tool.initialize().await
        })
        .await?;
        self.state = RunnableState::Initialized;

        self.execution_phase(stress, results).await
    }

    /// Run the executor; results collected before a failure are kept
    async fn execution_phase(
        &mut self,
        stress: Option<&StressConfig>,
        results: &mut Vec<ExecutionResult>,
    ) -> StressResult<()> {
        self.state = RunnableState::Executing;
        let logger = self.tool.logger();
        let data = self.tool.tool_data();
        logger.start_phase(Phase::Execution);
        logger.log_execution(&format!(
            "Running distribution '{}' with {:?}",
            self.distribution.name(),
            self.stop
        ));
        data.set_flag(keys::EXECUTION_COMPLETED, false);

        let handle = self.executor.handle();
        let controller = stress.map(|config| {
            let profile = StressProfile::new(config.clone(), handle.worker_count());
            StressController::spawn(profile, handle.gate().clone())
        });

        let started = Instant::now();
        let outcome = self
            .executor
            .run(Arc::clone(&self.distribution), self.stop.clone())
            .await;
        let elapsed = started.elapsed();

        if let Some(controller) = controller {
            controller.stop().await;
        }

        *results = outcome.results;
        logger.log_execution(&format!("Collected {} results", results.len()));
        if let Some(err) = outcome.error {
            return Err(err.in_phase(Phase::Execution));
        }

        data.set_flag(keys::EXECUTION_COMPLETED, true);
        let time_limit_reached = self.stop.time_limit().is_some_and(|limit| elapsed >= limit);
        data.set_flag(keys::TIME_LIMIT_REACHED, time_limit_reached);
        logger.end_phase(Phase::Execution);
        Ok(())
    }
}

impl fmt::Debug for Runnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runnable")
            .field("tool", &self.tool.name())
            .field("distribution", &self.distribution.name())
            .field("executor", &self.executor.kind())
            .field("stop", &self.stop)
            .field("state", &self.state)
            .finish()
    }
}

/// [`Runnable`] whose active worker count follows a sine wave
#[derive(Debug)]
pub struct StressVariableRunnable {
    inner: Runnable,
    stress: StressConfig,
}

impl StressVariableRunnable {
    /// Wrap a runnable with stress modulation
    ///
    /// # Errors
    /// [`StressError::Config`] if the modulation settings are invalid.
    pub fn new(inner: Runnable, stress: StressConfig) -> StressResult<Self> {
        stress.validate()?;
        Ok(Self { inner, stress })
    }

    /// Current state
    pub fn state(&self) -> RunnableState {
        self.inner.state()
    }

    /// Handle of the executor, for the shutdown coordinator
    pub fn executor_handle(&self) -> ExecutorHandle {
        self.inner.executor_handle()
    }

    /// Modulation settings
    pub fn stress(&self) -> &StressConfig {
        &self.stress
    }

    /// Run every phase with the stress controller active during execution
    pub async fn execute(&mut self) -> RunReport {
        let stress = self.stress.clone();
        self.inner.drive(Some(&stress)).await
    }
}
