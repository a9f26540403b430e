//! Result aggregation for one execution phase

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::task::{ExecutionResult, TaskStatus};

/// Per-command tallies
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommandSummary {
    /// Results recorded for the command
    pub runs: usize,
    /// Failed runs
    pub failures: usize,
    /// Mean metric over successful runs that reported one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_metric: Option<f64>,
}

/// Aggregated view of a result list
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultSummary {
    /// Results recorded
    pub total: usize,

    /// Successful tasks
    pub succeeded: usize,

    /// Failed tasks
    pub failed: usize,

    /// Cancelled or abandoned tasks
    pub cancelled: usize,

    /// Distinct worker units that ran at least one task
    pub workers_used: usize,

    /// First start to last end
    pub wall_time: Duration,

    /// Executed tasks per second of wall time
    pub tasks_per_second: f64,

    /// Tallies keyed by command name
    pub by_command: BTreeMap<String, CommandSummary>,
}

impl ResultSummary {
    /// Tasks that actually ran
    pub fn executed(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Fraction of executed tasks that succeeded (0.0 - 1.0)
    pub fn success_rate(&self) -> f64 {
        let executed = self.executed();
        if executed > 0 {
            self.succeeded as f64 / executed as f64
        } else {
            0.0
        }
    }

    /// Whether no task failed
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Aggregate a result list
pub fn summarize(results: &[ExecutionResult]) -> ResultSummary {
    if results.is_empty() {
        return ResultSummary::default();
    }

    let mut summary = ResultSummary {
        total: results.len(),
        ..Default::default()
    };
    let mut metric_sums: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    let mut workers = std::collections::BTreeSet::new();

    for result in results {
        match result.status {
            TaskStatus::Success => summary.succeeded += 1,
            TaskStatus::Failure => summary.failed += 1,
            TaskStatus::Cancelled => summary.cancelled += 1,
        }
        if result.status != TaskStatus::Cancelled {
            if let Some(worker_id) = result.worker_id {
                workers.insert(worker_id);
            }
        }

        let entry = summary
            .by_command
            .entry(result.task.command.clone())
            .or_default();
        entry.runs += 1;
        if result.is_failure() {
            entry.failures += 1;
        }
        if let (TaskStatus::Success, Some(metric)) = (result.status, result.metric) {
            let sum = metric_sums.entry(result.task.command.as_str()).or_default();
            sum.0 += metric;
            sum.1 += 1;
        }
    }

    for (command, (sum, count)) in metric_sums {
        if let Some(entry) = summary.by_command.get_mut(command) {
            entry.mean_metric = Some(sum / count as f64);
        }
    }

    summary.workers_used = workers.len();

    let first = results.iter().map(|r| r.started_at).min();
    let last = results.iter().map(|r| r.ended_at).max();
    summary.wall_time = match (first, last) {
        (Some(first), Some(last)) => (last - first).to_std().unwrap_or(Duration::ZERO),
        _ => Duration::ZERO,
    };

    let secs = summary.wall_time.as_secs_f64();
    summary.tasks_per_second = if secs > 0.0 {
        summary.executed() as f64 / secs
    } else {
        0.0
    };

    summary
}
