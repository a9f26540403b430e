//! Worker statistics tracking

use std::time::{Duration, Instant};

use crate::task::{ExecutionResult, TaskStatus};

/// Statistics tracked by each worker unit
#[derive(Debug, Default, Clone)]
pub struct WorkerStats {
    /// Tasks that completed successfully
    pub completed: usize,

    /// Tasks that failed (including panics and forced terminations)
    pub failed: usize,

    /// Tasks cancelled by a stop request
    pub cancelled: usize,

    /// Forced terminations after an expired grace period or a kill
    pub forced: usize,

    /// Unit start time
    pub started_at: Option<Instant>,

    /// Unit end time
    pub ended_at: Option<Instant>,
}

impl WorkerStats {
    /// Create new empty stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking (records start time)
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Stop tracking (records end time)
    pub fn stop(&mut self) {
        self.ended_at = Some(Instant::now());
    }

    /// Count one result
    pub fn record(&mut self, result: &ExecutionResult) {
        match result.status {
            TaskStatus::Success => self.completed += 1,
            TaskStatus::Failure => self.failed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
        }
    }

    /// Count one forced termination
    pub fn record_forced(&mut self) {
        self.forced += 1;
    }

    /// Tasks with an outcome other than cancellation
    pub fn executed(&self) -> usize {
        self.completed + self.failed
    }

    /// Every recorded result
    pub fn total(&self) -> usize {
        self.executed() + self.cancelled
    }

    /// Fraction of executed tasks that succeeded (0.0 - 1.0)
    pub fn success_rate(&self) -> f64 {
        if self.executed() == 0 {
            0.0
        } else {
            self.completed as f64 / self.executed() as f64
        }
    }

    /// Elapsed time since start
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|start| {
            self.ended_at
                .map(|end| end.duration_since(start))
                .unwrap_or_else(|| start.elapsed())
        })
    }

    /// Executed tasks per second
    pub fn tasks_per_second(&self) -> f64 {
        self.elapsed()
            .map(|d| {
                let secs = d.as_secs_f64();
                if secs > 0.0 {
                    self.executed() as f64 / secs
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0)
    }

    /// Merge stats from another unit
    ///
    /// Keeps the earliest start and the latest end.
    pub fn merge(&mut self, other: &WorkerStats) {
        self.completed += other.completed;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
        self.forced += other.forced;
        self.started_at = match (self.started_at, other.started_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.ended_at = match (self.ended_at, other.ended_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_worker_stats_defaults() {
        let stats = WorkerStats::default();
        assert_eq!(stats.total(), 0);
        assert_eq!(stats.forced, 0);
        assert!(stats.started_at.is_none());
        assert!(stats.ended_at.is_none());
    }

    #[test]
    fn test_worker_stats_record() {
        let now = Utc::now();
        let mut stats = WorkerStats::new();
        stats.record(&ExecutionResult::success(
            0,
            0,
            "a".into(),
            Default::default(),
            now,
        ));
        stats.record(&ExecutionResult::failure(1, 0, "b".into(), "boom", now));
        stats.record(&ExecutionResult::cancelled(2, 0, "c".into(), "stop", now));

        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.executed(), 2);
        assert_eq!(stats.total(), 3);
        assert!((stats.success_rate() - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_worker_stats_success_rate_zero_tasks() {
        assert_eq!(WorkerStats::new().success_rate(), 0.0);
    }

    #[test]
    fn test_worker_stats_merge() {
        let mut a = WorkerStats::new();
        a.completed = 10;
        a.failed = 1;
        a.start();

        let mut b = WorkerStats::new();
        b.completed = 5;
        b.cancelled = 2;
        b.forced = 1;

        a.merge(&b);

        assert_eq!(a.completed, 15);
        assert_eq!(a.failed, 1);
        assert_eq!(a.cancelled, 2);
        assert_eq!(a.forced, 1);
        assert!(a.started_at.is_some());
    }

    #[test]
    fn test_worker_stats_start_stop() {
        let mut stats = WorkerStats::new();
        assert!(stats.elapsed().is_none());

        stats.start();
        std::thread::sleep(Duration::from_millis(10));
        stats.stop();

        assert!(stats.elapsed().unwrap() >= Duration::from_millis(10));
    }
}
