//! Process-spawning tool manager

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use memstress_core::{
    ExecutionResult, PhaseLogger, StressError, StressResult, TaskContext, TaskDescriptor,
    TaskError, TaskOutput, TaskRunner, ToolData, ToolManager, TracingPhaseLogger,
};
use tokio::process::Command;

/// Split a command line into a descriptor on whitespace
pub fn parse_command(line: &str) -> Option<TaskDescriptor> {
    let mut words = line.split_whitespace();
    let command = words.next()?;
    Some(TaskDescriptor::new(command).with_args(words))
}

/// Runs each descriptor as a child process
#[derive(Debug, Default)]
pub struct ProcessRunner;

#[async_trait]
impl TaskRunner for ProcessRunner {
    fn name(&self) -> &str {
        "process"
    }

    async fn run(&self, task: &TaskDescriptor, ctx: &TaskContext) -> Result<TaskOutput, TaskError> {
        tracing::debug!(
            worker_id = ctx.worker_id,
            sequence = ctx.sequence,
            cpus = ?ctx.affinity.as_ref().map(|mask| &mask.cpus),
            command = %task.label(),
            "Spawning"
        );

        let child = Command::new(&task.command)
            .args(&task.args)
            .env("MEMSTRESS_WORKER", ctx.worker_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| TaskError::failed(format!("cannot spawn '{}': {err}", task.command)))?;

        // Dropping the child on stop kills it.
        let output = tokio::select! {
            output = child.wait_with_output() => output
                .map_err(|err| TaskError::failed(format!("waiting on '{}': {err}", task.command)))?,
            _ = ctx.stopped() => return Err(TaskError::Cancelled),
        };

        match output.status.code() {
            Some(0) => Ok(TaskOutput::with_exit_code(0)),
            Some(code) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let message = stderr
                    .lines()
                    .rev()
                    .find(|line| !line.trim().is_empty())
                    .unwrap_or("no diagnostic output")
                    .trim()
                    .to_string();
                Err(TaskError::ExitCode { code, message })
            }
            None => Err(TaskError::failed(format!(
                "'{}' was terminated by a signal",
                task.command
            ))),
        }
    }
}

/// [`ToolManager`] for a list of external commands
pub struct ProcessTool {
    commands: Vec<TaskDescriptor>,
    output: Option<PathBuf>,
    logger: TracingPhaseLogger,
    data: ToolData,
    runner: Arc<ProcessRunner>,
}

impl ProcessTool {
    /// Tool over the given commands, optionally writing results to `output`
    pub fn new(commands: Vec<TaskDescriptor>, output: Option<PathBuf>) -> Self {
        Self {
            commands,
            output,
            logger: TracingPhaseLogger::new("memstress"),
            data: ToolData::new(),
            runner: Arc::new(ProcessRunner),
        }
    }
}

#[async_trait]
impl ToolManager for ProcessTool {
    fn name(&self) -> &str {
        "memstress"
    }

    fn logger(&self) -> &dyn PhaseLogger {
        &self.logger
    }

    fn tool_data(&self) -> &ToolData {
        &self.data
    }

    fn runner(&self) -> Arc<dyn TaskRunner> {
        self.runner.clone()
    }

    async fn setup(&self) -> StressResult<()> {
        if self.commands.is_empty() {
            return Err(StressError::tool("no commands to run"));
        }
        let programs: BTreeSet<&str> = self.commands.iter().map(|c| c.command.as_str()).collect();
        self.data.set("programs", programs.len());
        self.logger
            .log_setup(&format!("{} commands over {} programs", self.commands.len(), programs.len()));
        Ok(())
    }

    async fn initialize(&self) -> StressResult<()> {
        if let Some(path) = &self.output {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                if !dir.is_dir() {
                    return Err(StressError::tool(format!(
                        "output directory {} does not exist",
                        dir.display()
                    )));
                }
            }
        }
        Ok(())
    }

    async fn post_process(&self, results: &[ExecutionResult]) -> StressResult<i32> {
        if let Some(path) = &self.output {
            let json = serde_json::to_vec_pretty(results)
                .map_err(|err| StressError::tool(format!("cannot encode results: {err}")))?;
            std::fs::write(path, json)?;
            tracing::info!(path = %path.display(), count = results.len(), "Results written");
        }
        Ok(if results.iter().any(ExecutionResult::is_failure) {
            1
        } else {
            0
        })
    }
}
