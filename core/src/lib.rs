//! memstress-core: concurrency orchestration for long-running memory stress runs
//!
//! This crate provides the engine the `memstress` tool is built on:
//!
//! - Distributions that produce the ordered sequence of task descriptors
//! - Supervised worker units with stop, kill and pause controls
//! - Batch and queue executors that drive a pool of units
//! - Phase-driven runnables, with optional sine-wave stress modulation
//! - A signal-driven shutdown coordinator
//!
//! What a task actually does is supplied from outside through
//! [`TaskRunner`], [`ToolManager`] and [`OsAbstraction`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod context;
pub mod distribution;
pub mod error;
pub mod executor;
pub mod os;
pub mod runnable;
pub mod shutdown;
pub mod task;
pub mod traits;
pub mod worker;

pub use channel::ChannelConfig;
pub use config::*;
pub use context::ToolData;
pub use distribution::{
    expand_pattern, CycleDistribution, Distribution, DistributionCursor, SequenceDistribution,
};
pub use error::*;
pub use executor::{
    summarize, BatchExecutor, ExecutionOutcome, ExecutorBuilder, ExecutorHandle, ExecutorState,
    QueueExecutor, ResultSummary, TaskExecutor,
};
pub use os::*;
pub use runnable::{
    RunReport, Runnable, RunnableState, StressController, StressProfile, StressVariableRunnable,
};
pub use shutdown::{ShutdownCoordinator, ShutdownReport, ShutdownSignal};
pub use task::*;
pub use traits::*;
pub use worker::{PauseGate, WorkerControl, WorkerState, WorkerStats, WorkerUnit, WorkerUnitBuilder};
