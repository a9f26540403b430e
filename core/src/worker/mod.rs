//! Worker units: one supervised execution context each
//!
//! A [`WorkerUnit`] runs tasks handed to it by an executor, either one at a
//! time ([`WorkerUnit::start`]) or by pulling from a shared [`WorkQueue`]
//! ([`WorkerUnit::start_queue_loop`]). Every task runs inside a supervisor
//! task that:
//!
//! 1. Waits for the pool's [`PauseGate`] to admit the unit
//! 2. Waits for the pool's [`TaskRateLimiter`]
//! 3. Runs the [`TaskRunner`](crate::traits::TaskRunner) as a child task
//! 4. Turns the outcome (success, error, panic, stop, kill) into an
//!    [`ExecutionResult`](crate::task::ExecutionResult) on the result sink
//! 5. Publishes the unit's [`WorkerState`]
//!
//! Task errors never reach the executor as control flow.
//!
//! # Example
//!
//! ```ignore
//! use memstress_core::worker::WorkerUnitBuilder;
//!
//! let mut unit = WorkerUnitBuilder::new(0).runner(runner).build()?;
//! unit.start(TaskDescriptor::new("walking_ones"), 0, results_tx)?;
//! let stats = unit.join(Duration::from_secs(30)).await?;
//! ```

mod builder;
mod gate;
mod queue;
mod rate_limiter;
mod state;
mod stats;
mod unit;

pub use builder::WorkerUnitBuilder;
pub use gate::PauseGate;
pub use queue::{Popped, QueuedTask, Slot, WorkQueue};
pub use rate_limiter::TaskRateLimiter;
pub use state::WorkerState;
pub use stats::WorkerStats;
pub use unit::{WorkerControl, WorkerUnit};
