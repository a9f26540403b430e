//! Task distributions
//!
//! A distribution produces the ordered sequence of [`TaskDescriptor`]s an
//! executor consumes. Two variants are provided:
//!
//! - [`CycleDistribution`] wraps back to the start of its pattern and never
//!   runs dry.
//! - [`SequenceDistribution`] hands out its pattern once and then reports
//!   [`StressError::Exhausted`].
//!
//! Cursor advance happens inside a single critical section, so executors may
//! pull from several workers at once without skipping or duplicating work.

mod cycle;
mod sequence;

pub use cycle::CycleDistribution;
pub use sequence::SequenceDistribution;

use serde::Serialize;

use crate::error::{StressError, StressResult};
use crate::task::TaskDescriptor;

/// Position of a distribution in its pattern
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DistributionCursor {
    /// Index of the next descriptor in the pattern
    pub position: usize,

    /// Completed passes over the pattern
    pub cycles: u64,

    /// Descriptors handed out since the last reset
    pub produced: u64,
}

/// Produces task descriptors for an executor
pub trait Distribution: Send + Sync {
    /// Distribution name, used in logs and errors
    fn name(&self) -> &str;

    /// Next descriptor in order
    ///
    /// # Errors
    /// Returns [`StressError::Exhausted`] once a finite distribution is consumed.
    fn next(&self) -> StressResult<TaskDescriptor>;

    /// Whether `next` would produce a descriptor
    fn has_next(&self) -> bool;

    /// Rewind to the start of the pattern
    fn reset(&self);

    /// Snapshot of the cursor
    fn cursor(&self) -> DistributionCursor;

    /// Length of the underlying pattern
    fn pattern_len(&self) -> usize;
}

/// Repeat `pattern` until it holds `size` descriptors
///
/// A pattern that is already long enough is returned unchanged.
///
/// # Errors
/// Returns a configuration error for an empty pattern.
pub fn expand_pattern(
    pattern: &[TaskDescriptor],
    size: usize,
) -> StressResult<Vec<TaskDescriptor>> {
    if pattern.is_empty() {
        return Err(StressError::config("the command pattern cannot be empty"));
    }
    if pattern.len() >= size {
        return Ok(pattern.to_vec());
    }
    Ok(pattern.iter().cycle().take(size).cloned().collect())
}

fn validate_pattern(name: &str, pattern: &[TaskDescriptor]) -> StressResult<()> {
    if pattern.is_empty() {
        return Err(StressError::config(format!(
            "distribution '{name}' needs at least one descriptor"
        )));
    }
    Ok(())
}
