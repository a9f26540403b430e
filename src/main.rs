//! memstress - concurrent memory stress runner

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use memstress_core::{
    expand_pattern, CycleDistribution, Distribution, ExecutorBuilder, PoolConfig, RunReport, Runnable,
    SequenceDistribution, ShutdownConfig, ShutdownCoordinator, StressVariableRunnable, ToolManager,
};
use tracing_subscriber::EnvFilter;

mod cli;
mod tool;

use cli::{Cli, Commands, RunArgs};
use tool::{parse_command, ProcessTool};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Task output owns stdout; logs go to stderr.
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => {
            let code = run(args).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Validate { config } => {
            let config = load_pool_config(&config)?;
            println!(
                "OK: {} workers, {:?} strategy",
                config.workers, config.strategy
            );
        }
    }

    Ok(())
}

fn load_pool_config(path: &Path) -> Result<PoolConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: PoolConfig =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("validating {}", path.display()))?;
    Ok(config)
}

async fn run(args: RunArgs) -> Result<i32> {
    let base = match &args.config {
        Some(path) => load_pool_config(path)?,
        None => PoolConfig::default(),
    };
    let pool = args.pool_config(base);
    pool.validate()?;

    let commands: Vec<_> = args.commands.iter().filter_map(|c| parse_command(c)).collect();
    if commands.is_empty() {
        bail!("no commands given");
    }
    let distribution: Arc<dyn Distribution> = if args.once {
        // `-n` with `--once` repeats a short list up to the task count.
        let pattern = match args.count {
            Some(count) => expand_pattern(&commands, count)?,
            None => commands.clone(),
        };
        Arc::new(SequenceDistribution::new("commands", pattern)?)
    } else {
        Arc::new(CycleDistribution::new("commands", commands.clone())?)
    };
    let stop = args.stop_condition();
    let stress = args.stress_config(pool.workers);

    let coordinator = Arc::new(ShutdownCoordinator::new(
        ShutdownConfig::default().with_grace_period(pool.grace_period),
    ));
    coordinator.on_flush(|report| {
        tracing::info!(
            signal = %report.signal,
            stopped = report.stopped,
            forced = report.forced,
            "Shutdown report"
        );
    });
    let signals = coordinator.install()?;

    let tool = Arc::new(ProcessTool::new(commands, args.output.clone()));
    let executor = ExecutorBuilder::new()
        .config(pool)
        .runner(tool.runner())
        .stopping_token(coordinator.stopping_token())
        .build()?;
    let runnable = Runnable::new(tool, distribution, executor, stop);
    coordinator.attach(runnable.executor_handle());

    let report = match stress {
        Some(stress) => {
            let mut runnable = StressVariableRunnable::new(runnable, stress)?;
            runnable.execute().await
        }
        None => {
            let mut runnable = runnable;
            runnable.execute().await
        }
    };

    coordinator.detach();
    signals.abort();

    print_report(&report, args.json)?;
    Ok(report.exit_code)
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let summary = &report.summary;
    println!("state:     {}", report.state);
    println!(
        "tasks:     {} total, {} succeeded, {} failed, {} cancelled",
        summary.total, summary.succeeded, summary.failed, summary.cancelled
    );
    println!(
        "workers:   {} used, {:.1} tasks/s over {:.2}s",
        summary.workers_used,
        summary.tasks_per_second,
        summary.wall_time.as_secs_f64()
    );
    for (command, tally) in &summary.by_command {
        println!(
            "  {command:<24} runs {:>6}  failures {:>4}",
            tally.runs, tally.failures
        );
    }
    if let Some(error) = &report.error {
        println!("error:     {error}");
    }
    println!("exit code: {}", report.exit_code);
    Ok(())
}
