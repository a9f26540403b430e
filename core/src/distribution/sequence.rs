//! Finite, non-cyclic distribution

use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{validate_pattern, Distribution, DistributionCursor};
use crate::error::{StressError, StressResult};
use crate::task::TaskDescriptor;

/// Hands out its pattern exactly once
#[derive(Debug)]
pub struct SequenceDistribution {
    name: String,
    pattern: Vec<TaskDescriptor>,
    cursor: Mutex<DistributionCursor>,
}

impl SequenceDistribution {
    /// Create a finite distribution
    ///
    /// # Errors
    /// Returns a configuration error if `pattern` is empty.
    pub fn new(name: impl Into<String>, pattern: Vec<TaskDescriptor>) -> StressResult<Self> {
        let name = name.into();
        validate_pattern(&name, &pattern)?;
        Ok(Self {
            name,
            pattern,
            cursor: Mutex::new(DistributionCursor::default()),
        })
    }

    /// Descriptors left before exhaustion
    pub fn remaining(&self) -> usize {
        self.pattern.len() - self.lock().position
    }

    fn lock(&self) -> MutexGuard<'_, DistributionCursor> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Distribution for SequenceDistribution {
    fn name(&self) -> &str {
        &self.name
    }

    fn next(&self) -> StressResult<TaskDescriptor> {
        let mut cursor = self.lock();
        let Some(task) = self.pattern.get(cursor.position).cloned() else {
            return Err(StressError::Exhausted {
                name: self.name.clone(),
                produced: cursor.produced,
            });
        };
        cursor.position += 1;
        cursor.produced += 1;
        if cursor.position == self.pattern.len() {
            cursor.cycles = 1;
        }
        Ok(task)
    }

    fn has_next(&self) -> bool {
        self.lock().position < self.pattern.len()
    }

    fn reset(&self) {
        *self.lock() = DistributionCursor::default();
    }

    fn cursor(&self) -> DistributionCursor {
        *self.lock()
    }

    fn pattern_len(&self) -> usize {
        self.pattern.len()
    }
}
