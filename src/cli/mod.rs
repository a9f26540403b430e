//! CLI argument parsing

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use memstress_core::{DrainPolicy, ExecutorKind, PoolConfig, PriorityLevel, StopCondition, StressConfig};

#[derive(Parser)]
#[command(name = "memstress")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run commands concurrently under a worker pool
    Run(RunArgs),
    /// Validate a pool configuration file
    Validate {
        /// Path to a JSON pool configuration
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Strategy {
    /// Fixed-size waves
    Batch,
    /// Shared queue with pull-based balancing
    Queue,
}

impl From<Strategy> for ExecutorKind {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Batch => ExecutorKind::Batch,
            Strategy::Queue => ExecutorKind::Queue,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Priority {
    /// Below normal
    Low,
    /// Default scheduling
    Normal,
    /// Above normal
    High,
}

impl From<Priority> for PriorityLevel {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::Low => PriorityLevel::Low,
            Priority::Normal => PriorityLevel::Normal,
            Priority::High => PriorityLevel::High,
        }
    }
}

#[derive(Args)]
pub struct RunArgs {
    /// Base pool configuration (JSON); flags below override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of worker units
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Executor strategy
    #[arg(short, long, value_enum)]
    pub strategy: Option<Strategy>,

    /// Maximum wave size for the batch strategy
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Queue capacity for the queue strategy
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Record queued work as cancelled instead of draining it on stop
    #[arg(long)]
    pub abandon: bool,

    /// Cap on task starts per second
    #[arg(long)]
    pub launch_rate: Option<f64>,

    /// Stop dispatching after the first failed task
    #[arg(long)]
    pub stop_on_error: bool,

    /// Process priority
    #[arg(long, value_enum)]
    pub priority: Option<Priority>,

    /// Seconds a unit may take to honour a stop before it is killed
    #[arg(long, value_parser = parse_secs)]
    pub grace: Option<Duration>,

    /// Run exactly this many tasks
    #[arg(short = 'n', long, conflicts_with = "duration")]
    pub count: Option<usize>,

    /// Run for this many seconds
    #[arg(short, long, value_parser = parse_secs)]
    pub duration: Option<Duration>,

    /// Run the command list once instead of cycling through it
    #[arg(long)]
    pub once: bool,

    /// Sine stress period in seconds (enables stress modulation)
    #[arg(long, value_parser = parse_secs)]
    pub stress_period: Option<Duration>,

    /// Sine stress amplitude in workers (defaults to half the pool)
    #[arg(long, requires = "stress_period")]
    pub stress_amplitude: Option<f64>,

    /// Sine stress centre line in workers (defaults to half the pool)
    #[arg(long, requires = "stress_period")]
    pub stress_mean: Option<f64>,

    /// Write every execution result to this file as JSON
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print the run report as JSON instead of a summary
    #[arg(long)]
    pub json: bool,

    /// Commands to run, one per argument (e.g. "memtester 64M 1")
    #[arg(required = true, last = true)]
    pub commands: Vec<String>,
}

impl RunArgs {
    /// Apply command line overrides to a base pool configuration
    pub fn pool_config(&self, mut config: PoolConfig) -> PoolConfig {
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(strategy) = self.strategy {
            config.strategy = strategy.into();
        }
        if let Some(size) = self.batch_size {
            config.batch_size = Some(size);
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if self.abandon {
            config.drain = DrainPolicy::AbandonImmediately;
        }
        if let Some(rate) = self.launch_rate {
            config.launch_rate = Some(rate);
        }
        if self.stop_on_error {
            config.stop_on_error = true;
        }
        if let Some(priority) = self.priority {
            config.priority = Some(priority.into());
        }
        if let Some(grace) = self.grace {
            config.grace_period = grace;
        }
        config
    }

    /// Stop condition implied by the flags
    pub fn stop_condition(&self) -> StopCondition {
        match (self.count, self.duration) {
            (Some(count), _) => StopCondition::TaskCount(count),
            (None, Some(duration)) => StopCondition::Duration(duration),
            (None, None) if self.once => StopCondition::TaskCount(self.commands.len()),
            (None, None) => StopCondition::Indefinite,
        }
    }

    /// Stress modulation settings, if a period was given
    pub fn stress_config(&self, workers: usize) -> Option<StressConfig> {
        let period = self.stress_period?;
        let mut stress = StressConfig::full_swing(workers).with_period(period);
        if let Some(amplitude) = self.stress_amplitude {
            stress = stress.with_amplitude(amplitude);
        }
        if let Some(mean) = self.stress_mean {
            stress = stress.with_mean(mean);
        }
        Some(stress)
    }
}

fn parse_secs(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number of seconds"))?;
    Duration::try_from_secs_f64(secs).map_err(|err| format!("invalid duration '{value}': {err}"))
}
