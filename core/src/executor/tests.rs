//! Tests for the executor module

use super::*;
use crate::config::{DrainPolicy, ExecutorKind, PoolConfig};
use crate::distribution::{CycleDistribution, DistributionCursor, SequenceDistribution};
use crate::error::{StressError, StressResult};
use crate::os::{AffinityMask, NumaTopology, OsAbstraction, PriorityLevel, WorkerHandle};
use crate::task::{TaskDescriptor, TaskOutput, TaskStatus};
use crate::traits::{TaskContext, TaskError, TaskRunner};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ============================================================================
// Mock TaskRunner
// ============================================================================

/// Sleeps per command, fails selected commands, tracks concurrency
struct ScriptedRunner {
    default_delay: Duration,
    delays: HashMap<String, Duration>,
    failing: HashSet<String>,
    running: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl ScriptedRunner {
    fn new(default_delay: Duration) -> Self {
        Self {
            default_delay,
            delays: HashMap::new(),
            failing: HashSet::new(),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    fn with_delay(mut self, command: &str, delay: Duration) -> Self {
        self.delays.insert(command.to_string(), delay);
        self
    }

    fn failing(mut self, command: &str) -> Self {
        self.failing.insert(command.to_string());
        self
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskRunner for ScriptedRunner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(&self, task: &TaskDescriptor, ctx: &TaskContext) -> Result<TaskOutput, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let delay = self
            .delays
            .get(&task.command)
            .copied()
            .unwrap_or(self.default_delay);
        let outcome = tokio::select! {
            _ = tokio::time::sleep(delay) => {
                if self.failing.contains(&task.command) {
                    Err(TaskError::failed(format!("{} reported errors", task.command)))
                } else {
                    Ok(TaskOutput::with_metric(delay.as_millis() as f64))
                }
            }
            _ = ctx.stopped() => Err(TaskError::Cancelled),
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

// ============================================================================
// Mock OsAbstraction
// ============================================================================

#[derive(Default)]
struct RecordingOs {
    priorities: Mutex<Vec<PriorityLevel>>,
}

impl OsAbstraction for RecordingOs {
    fn platform_name(&self) -> &str {
        "test"
    }

    fn get_worker_affinity_plan(
        &self,
        worker_count: usize,
        _topology: &NumaTopology,
    ) -> Vec<AffinityMask> {
        (0..worker_count).map(|w| AffinityMask::single(w, None)).collect()
    }

    fn set_priority(&self, level: PriorityLevel) -> crate::error::StressResult<()> {
        self.priorities.lock().unwrap().push(level);
        Ok(())
    }

    fn terminate(&self, _handle: WorkerHandle, _force: bool) {}
}

// ============================================================================
// Mock Distribution
// ============================================================================

/// Cycles A, B, C until the `fail_at`-th pull, which fails
struct FlakyDistribution {
    fail_at: u64,
    pulls: AtomicU64,
}

impl FlakyDistribution {
    fn failing_at(fail_at: u64) -> Arc<Self> {
        Arc::new(Self {
            fail_at,
            pulls: AtomicU64::new(0),
        })
    }
}

impl Distribution for FlakyDistribution {
    fn name(&self) -> &str {
        "flaky"
    }

    fn next(&self) -> StressResult<TaskDescriptor> {
        let pull = self.pulls.fetch_add(1, Ordering::SeqCst) + 1;
        if pull >= self.fail_at {
            return Err(StressError::config("backing store went away"));
        }
        Ok(TaskDescriptor::new(["A", "B", "C"][((pull - 1) % 3) as usize]))
    }

    fn has_next(&self) -> bool {
        self.pulls.load(Ordering::SeqCst) + 1 < self.fail_at
    }

    fn reset(&self) {
        self.pulls.store(0, Ordering::SeqCst);
    }

    fn cursor(&self) -> DistributionCursor {
        let produced = self.pulls.load(Ordering::SeqCst).min(self.fail_at - 1);
        DistributionCursor {
            position: (produced % 3) as usize,
            cycles: produced / 3,
            produced,
        }
    }

    fn pattern_len(&self) -> usize {
        3
    }
}

// ============================================================================
// Helper functions
// ============================================================================

fn abc() -> Arc<dyn Distribution> {
    Arc::new(
        CycleDistribution::new("abc", vec!["A".into(), "B".into(), "C".into()])
            .expect("valid pattern"),
    )
}

fn build(config: PoolConfig, runner: Arc<ScriptedRunner>) -> Box<dyn TaskExecutor> {
    ExecutorBuilder::new()
        .config(config)
        .runner(runner)
        .topology(NumaTopology::single_node(4))
        .build()
        .expect("Failed to build executor")
}

fn commands(results: &[ExecutionResult]) -> Vec<&str> {
    results.iter().map(|r| r.task.command.as_str()).collect()
}

fn assert_contiguous(results: &[ExecutionResult]) {
    let sequences: Vec<u64> = results.iter().map(|r| r.sequence).collect();
    let expected: Vec<u64> = (0..results.len() as u64).collect();
    assert_eq!(sequences, expected, "every sequence exactly once");
}

fn fast() -> Arc<ScriptedRunner> {
    Arc::new(ScriptedRunner::new(Duration::from_millis(5)))
}

// ============================================================================
// Builder
// ============================================================================

#[test]
fn test_builder_missing_runner() {
    let err = ExecutorBuilder::new().build().err().unwrap();
    assert!(matches!(err, StressError::MissingComponent("runner")));
}

#[test]
fn test_builder_rejects_invalid_config() {
    let err = ExecutorBuilder::new()
        .workers(0)
        .runner(fast())
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, StressError::Config(_)));
}

#[tokio::test]
async fn test_builder_honours_strategy() {
    let batch = build(PoolConfig::new(2), fast());
    assert_eq!(batch.kind(), ExecutorKind::Batch);

    let queue = build(PoolConfig::new(2).with_strategy(ExecutorKind::Queue), fast());
    assert_eq!(queue.kind(), ExecutorKind::Queue);
    assert_eq!(queue.state(), ExecutorState::Created);
    assert_eq!(queue.handle().worker_count(), 2);
}

// ============================================================================
// Batch executor
// ============================================================================

#[tokio::test]
async fn test_batch_cycles_pattern_in_order() {
    let mut executor = build(PoolConfig::new(4), fast());

    let results = executor.run(abc(), StopCondition::TaskCount(10)).await.into_result().unwrap();

    assert_eq!(
        commands(&results),
        vec!["A", "B", "C", "A", "B", "C", "A", "B", "C", "A"]
    );
    assert_contiguous(&results);
    assert!(results.iter().all(ExecutionResult::is_success));
    assert_eq!(executor.state(), ExecutorState::Stopped);
}

#[tokio::test]
async fn test_batch_waves_never_overlap() {
    let runner = Arc::new(ScriptedRunner::new(Duration::from_millis(20)));
    let mut executor = build(PoolConfig::new(4), Arc::clone(&runner));

    let results = executor.run(abc(), StopCondition::TaskCount(10)).await.into_result().unwrap();

    let waves: Vec<&[ExecutionResult]> = results.chunks(4).collect();
    assert_eq!(waves.len(), 3);
    for pair in waves.windows(2) {
        let last_end = pair[0].iter().map(|r| r.ended_at).max().unwrap();
        let next_start = pair[1].iter().map(|r| r.started_at).min().unwrap();
        assert!(last_end <= next_start, "wave started before previous finished");
    }
    assert!(runner.peak() <= 4);
}

#[tokio::test]
async fn test_batch_size_caps_concurrency() {
    let runner = Arc::new(ScriptedRunner::new(Duration::from_millis(10)));
    let mut executor = build(PoolConfig::new(6).with_batch_size(2), Arc::clone(&runner));

    let results = executor.run(abc(), StopCondition::TaskCount(7)).await.into_result().unwrap();

    assert_eq!(results.len(), 7);
    assert_eq!(runner.peak(), 2);
}

#[tokio::test]
async fn test_batch_failure_does_not_stop_wave() {
    let runner = Arc::new(ScriptedRunner::new(Duration::from_millis(5)).failing("B"));
    let mut executor = build(PoolConfig::new(3), runner);

    let results = executor.run(abc(), StopCondition::TaskCount(6)).await.into_result().unwrap();

    assert_eq!(results.len(), 6);
    let failed: Vec<u64> = results
        .iter()
        .filter(|r| r.is_failure())
        .map(|r| r.sequence)
        .collect();
    assert_eq!(failed, vec![1, 4]);
}

#[tokio::test]
async fn test_batch_stop_on_error_halts_after_wave() {
    let runner = Arc::new(ScriptedRunner::new(Duration::from_millis(5)).failing("B"));
    let mut executor = build(
        PoolConfig::new(1).with_stop_on_error(true),
        Arc::clone(&runner),
    );

    let results = executor.run(abc(), StopCondition::TaskCount(10)).await.into_result().unwrap();

    assert_eq!(commands(&results), vec!["A", "B"]);
    assert_eq!(runner.calls(), 2);
}

#[tokio::test]
async fn test_batch_finite_distribution_exhausts_early() {
    let distribution: Arc<dyn Distribution> = Arc::new(
        SequenceDistribution::new("seq", vec!["x".into(), "y".into(), "z".into()]).unwrap(),
    );
    let mut executor = build(PoolConfig::new(2), fast());

    let results = executor
        .run(distribution, StopCondition::TaskCount(10))
        .await
        .into_result()
        .unwrap();

    assert_eq!(commands(&results), vec!["x", "y", "z"]);
}

#[tokio::test]
async fn test_batch_exhausted_before_first_task_is_an_error() {
    let seq = SequenceDistribution::new("seq", vec!["x".into()]).unwrap();
    seq.next().unwrap();
    let mut executor = build(PoolConfig::new(2), fast());

    let err = executor
        .run(Arc::new(seq), StopCondition::TaskCount(3))
        .await
        .into_result()
        .unwrap_err();

    assert!(err.is_exhausted());
    assert_eq!(executor.state(), ExecutorState::Stopped);
}

#[tokio::test]
async fn test_batch_distribution_failure_keeps_collected_results() {
    let mut executor = build(PoolConfig::new(4), fast());

    let outcome = executor
        .run(FlakyDistribution::failing_at(7), StopCondition::TaskCount(10))
        .await;

    assert!(matches!(outcome.error, Some(StressError::Config(_))));
    // One full wave plus the two descriptors pulled before the failure.
    assert_eq!(outcome.results.len(), 6);
    assert_contiguous(&outcome.results);
    assert!(outcome.results.iter().all(ExecutionResult::is_success));
    assert_eq!(executor.state(), ExecutorState::Stopped);
}

#[tokio::test]
async fn test_batch_duration_checked_at_wave_boundaries() {
    let runner = Arc::new(ScriptedRunner::new(Duration::from_millis(20)));
    let mut executor = build(PoolConfig::new(2), runner);

    let start = Instant::now();
    let results = executor
        .run(abc(), StopCondition::Duration(Duration::from_millis(100)))
        .await
        .into_result()
        .unwrap();

    assert!(start.elapsed() >= Duration::from_millis(100));
    assert!(results.len() >= 6);
    assert_eq!(results.len() % 2, 0, "only whole waves are dispatched");
    assert_contiguous(&results);
}

#[tokio::test]
async fn test_batch_handle_stop_ends_indefinite_run() {
    let mut executor = build(PoolConfig::new(2), fast());
    let handle = executor.handle();

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop();
        handle
    });

    let results = executor.run(abc(), StopCondition::Indefinite).await.into_result().unwrap();
    let handle = stopper.await.unwrap();

    assert!(!results.is_empty());
    assert!(results.iter().all(ExecutionResult::is_success));
    assert_eq!(handle.state(), ExecutorState::Stopped);
    assert!(handle.wait_stopped(Duration::from_millis(10)).await);
}

#[tokio::test]
async fn test_executor_runs_once() {
    let mut executor = build(PoolConfig::new(1), fast());
    executor.run(abc(), StopCondition::TaskCount(1)).await.into_result().unwrap();

    let err = executor
        .run(abc(), StopCondition::TaskCount(1))
        .await
        .into_result()
        .unwrap_err();
    assert!(matches!(err, StressError::Executor(_)));
}

#[tokio::test]
async fn test_priority_applied_on_start() {
    let os = Arc::new(RecordingOs::default());
    let mut executor = ExecutorBuilder::new()
        .config(PoolConfig::new(1).with_priority(PriorityLevel::High))
        .runner(fast())
        .os(Arc::clone(&os) as Arc<dyn OsAbstraction>)
        .build()
        .unwrap();

    executor.run(abc(), StopCondition::TaskCount(1)).await.into_result().unwrap();
    assert_eq!(*os.priorities.lock().unwrap(), vec![PriorityLevel::High]);
}

// ============================================================================
// Queue executor
// ============================================================================

fn queue_config(workers: usize) -> PoolConfig {
    PoolConfig::new(workers)
        .with_strategy(ExecutorKind::Queue)
        .with_poll_interval(Duration::from_millis(10))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queue_exactly_once() {
    let runner = Arc::new(ScriptedRunner::new(Duration::from_millis(1)));
    let mut executor = build(queue_config(4).with_queue_capacity(8), Arc::clone(&runner));

    let results = executor.run(abc(), StopCondition::TaskCount(200)).await.into_result().unwrap();

    assert_eq!(results.len(), 200);
    assert_contiguous(&results);
    assert!(results.iter().all(ExecutionResult::is_success));
    assert_eq!(runner.calls(), 200);
    // Descriptor order follows the distribution.
    assert_eq!(commands(&results[..4]), vec!["A", "B", "C", "A"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queue_balances_slow_tasks() {
    let pattern: Vec<TaskDescriptor> = std::iter::once("slow".into())
        .chain((0..19).map(|_| "fast".into()))
        .collect();
    let distribution: Arc<dyn Distribution> =
        Arc::new(SequenceDistribution::new("mixed", pattern).unwrap());
    let runner = Arc::new(
        ScriptedRunner::new(Duration::from_millis(10))
            .with_delay("slow", Duration::from_millis(300)),
    );
    let mut executor = build(queue_config(2).with_queue_capacity(5), runner);

    let start = Instant::now();
    let results = executor
        .run(distribution, StopCondition::TaskCount(20))
        .await
        .into_result()
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(results.len(), 20);
    let slow_worker = results[0].worker_id;
    let on_slow_worker = results.iter().filter(|r| r.worker_id == slow_worker).count();
    assert!(
        on_slow_worker <= 2,
        "slow worker ran {on_slow_worker} tasks; the other should have taken the fast ones"
    );
    // Serial execution on one worker would take ~490ms.
    assert!(elapsed < Duration::from_millis(450), "took {elapsed:?}");
}

#[tokio::test]
async fn test_queue_finite_distribution() {
    let distribution: Arc<dyn Distribution> = Arc::new(
        SequenceDistribution::new("seq", vec!["x".into(), "y".into()]).unwrap(),
    );
    let mut executor = build(queue_config(3), fast());

    let results = executor
        .run(distribution, StopCondition::TaskCount(100))
        .await
        .into_result()
        .unwrap();

    assert_eq!(commands(&results), vec!["x", "y"]);
}

#[tokio::test]
async fn test_queue_distribution_failure_keeps_collected_results() {
    let runner = Arc::new(ScriptedRunner::new(Duration::from_millis(5)));
    let mut executor = build(queue_config(2), Arc::clone(&runner));

    let outcome = executor
        .run(FlakyDistribution::failing_at(5), StopCondition::TaskCount(10))
        .await;

    assert!(!outcome.is_success());
    assert!(matches!(outcome.error, Some(StressError::Config(_))));
    assert_eq!(commands(&outcome.results), vec!["A", "B", "C", "A"]);
    assert!(outcome.results.iter().all(ExecutionResult::is_success));
    assert_eq!(runner.calls(), 4);
}

#[tokio::test]
async fn test_queue_feed_stop_never_skips_a_descriptor() {
    let distribution = Arc::new(
        CycleDistribution::new("abc", vec!["A".into(), "B".into(), "C".into()]).unwrap(),
    );
    let runner = Arc::new(ScriptedRunner::new(Duration::from_millis(200)));
    let mut executor = build(queue_config(1).with_queue_capacity(1), runner);
    let handle = executor.handle();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop();
    });

    let results = executor
        .run(
            Arc::clone(&distribution) as Arc<dyn Distribution>,
            StopCondition::Indefinite,
        )
        .await
        .into_result()
        .unwrap();

    // One in flight plus one queued; the blocked feeder never pulled a third.
    assert_eq!(results.len(), 2);
    assert_eq!(results.len() as u64, distribution.cursor().produced);
    assert_contiguous(&results);
    assert!(results.iter().all(ExecutionResult::is_success));
}

#[tokio::test]
async fn test_queue_feed_stop_drains_to_empty() {
    let runner = Arc::new(ScriptedRunner::new(Duration::from_millis(20)));
    let mut executor = build(queue_config(2).with_queue_capacity(5), runner);
    let handle = executor.handle();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.stop();
    });

    let results = executor.run(abc(), StopCondition::Indefinite).await.into_result().unwrap();

    assert!(results.len() >= 5);
    assert_contiguous(&results);
    assert!(
        results.iter().all(ExecutionResult::is_success),
        "queued work must still execute under DrainToEmpty"
    );
}

#[tokio::test]
async fn test_queue_feed_stop_abandons_queued_items() {
    let runner = Arc::new(ScriptedRunner::new(Duration::from_millis(50)));
    let mut executor = build(
        queue_config(1)
            .with_queue_capacity(10)
            .with_drain(DrainPolicy::AbandonImmediately),
        Arc::clone(&runner),
    );
    let handle = executor.handle();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.stop();
    });

    let results = executor.run(abc(), StopCondition::Indefinite).await.into_result().unwrap();

    assert_contiguous(&results);
    assert_eq!(results[0].status, TaskStatus::Success, "in-flight task finishes");
    let abandoned: Vec<_> = results.iter().filter(|r| r.worker_id.is_none()).collect();
    assert!(!abandoned.is_empty());
    assert!(abandoned.iter().all(|r| r.status == TaskStatus::Cancelled));
    assert_eq!(runner.calls(), 1);
}

#[tokio::test]
async fn test_queue_stop_all_accounts_for_every_item() {
    let runner = Arc::new(ScriptedRunner::new(Duration::from_secs(5)));
    let mut executor = build(queue_config(2).with_queue_capacity(4), runner);
    let handle = executor.handle();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop_all();
    });

    let start = Instant::now();
    let results = executor.run(abc(), StopCondition::Indefinite).await.into_result().unwrap();

    assert!(start.elapsed() < Duration::from_secs(2));
    assert_contiguous(&results);
    assert!(results.iter().all(|r| r.status == TaskStatus::Cancelled));
    // Two in flight plus a full queue.
    assert_eq!(results.len(), 6);
}

#[tokio::test]
async fn test_queue_duration_limit() {
    let runner = Arc::new(ScriptedRunner::new(Duration::from_millis(10)));
    let mut executor = build(queue_config(2), runner);

    let start = Instant::now();
    let results = executor
        .run(abc(), StopCondition::Duration(Duration::from_millis(80)))
        .await
        .into_result()
        .unwrap();

    assert!(start.elapsed() >= Duration::from_millis(80));
    assert!(!results.is_empty());
    assert_contiguous(&results);
}

#[tokio::test]
async fn test_queue_stop_on_error() {
    let runner = Arc::new(ScriptedRunner::new(Duration::from_millis(5)).failing("C"));
    let mut executor = build(
        queue_config(1)
            .with_queue_capacity(1)
            .with_stop_on_error(true),
        runner,
    );

    let results = executor.run(abc(), StopCondition::TaskCount(50)).await.into_result().unwrap();

    assert!(results.len() < 50);
    assert_eq!(results.iter().filter(|r| r.is_failure()).count(), 1);
}

// ============================================================================
// Aggregation
// ============================================================================

#[test]
fn test_summarize_empty() {
    let summary = summarize(&[]);
    assert_eq!(summary.total, 0);
    assert_eq!(summary.success_rate(), 0.0);
    assert!(summary.is_clean());
}

#[test]
fn test_summarize_counts_and_metrics() {
    let started = Utc::now();
    let results = vec![
        ExecutionResult::success(0, 0, "A".into(), TaskOutput::with_metric(10.0), started),
        ExecutionResult::success(1, 1, "A".into(), TaskOutput::with_metric(20.0), started),
        ExecutionResult::failure(2, 0, "B".into(), "boom", started),
        ExecutionResult::abandoned(3, "C".into(), "queue abandoned"),
    ];

    let summary = summarize(&results);

    assert_eq!(summary.total, 4);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.cancelled, 1);
    assert_eq!(summary.workers_used, 2);
    assert!(!summary.is_clean());
    assert!((summary.success_rate() - 2.0 / 3.0).abs() < 0.001);

    let a = &summary.by_command["A"];
    assert_eq!(a.runs, 2);
    assert_eq!(a.mean_metric, Some(15.0));
    assert_eq!(summary.by_command["B"].failures, 1);
    assert_eq!(summary.by_command["C"].mean_metric, None);
}
