//! Cyclic distribution

use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{validate_pattern, Distribution, DistributionCursor};
use crate::error::StressResult;
use crate::task::TaskDescriptor;

/// Repeats a fixed pattern forever
///
/// After `M` calls to [`next`](Distribution::next) on a pattern of length
/// `L`, the produced sequence is the pattern repeated `M / L` times followed
/// by its first `M mod L` descriptors.
#[derive(Debug)]
pub struct CycleDistribution {
    name: String,
    pattern: Vec<TaskDescriptor>,
    cursor: Mutex<DistributionCursor>,
}

impl CycleDistribution {
    /// Create a cyclic distribution
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

    /// The configured pattern
    pub fn pattern(&self) -> &[TaskDescriptor] {
        &self.pattern
    }

    fn lock(&self) -> MutexGuard<'_, DistributionCursor> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Distribution for CycleDistribution {
    fn name(&self) -> &str {
        &self.name
    }

    fn next(&self) -> StressResult<TaskDescriptor> {
        let mut cursor = self.lock();
        let task = self.pattern[cursor.position].clone();
        cursor.position += 1;
        cursor.produced += 1;
        if cursor.position == self.pattern.len() {
            cursor.position = 0;
            cursor.cycles += 1;
        }
        Ok(task)
    }

    fn has_next(&self) -> bool {
        true
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn abc() -> CycleDistribution {
        CycleDistribution::new(
            "abc",
            vec!["A".into(), "B".into(), "C".into()],
        )
        .unwrap()
    }

    #[test]
    fn test_empty_pattern_rejected() {
        assert!(CycleDistribution::new("empty", Vec::new()).is_err());
    }

    #[test]
    fn test_cycles_in_order() {
        let dist = abc();
        let produced: Vec<String> = (0..10).map(|_| dist.next().unwrap().command).collect();
        assert_eq!(
            produced,
            vec!["A", "B", "C", "A", "B", "C", "A", "B", "C", "A"]
        );
    }

    #[test]
    fn test_wraparound_reproduces_prefix() {
        let dist = abc();
        let len = dist.pattern_len();
        let m = 3 * len + 2;
        let produced: Vec<TaskDescriptor> = (0..m).map(|_| dist.next().unwrap()).collect();

        let tail = &produced[m - (m % len)..];
        assert_eq!(tail, &dist.pattern()[..m % len]);

        let cursor = dist.cursor();
        assert_eq!(cursor.cycles, 3);
        assert_eq!(cursor.position, 2);
        assert_eq!(cursor.produced, m as u64);
    }

    #[test]
    fn test_always_has_next() {
        let dist = abc();
        for _ in 0..100 {
            assert!(dist.has_next());
            dist.next().unwrap();
        }
    }

    #[test]
    fn test_reset_rewinds() {
        let dist = abc();
        dist.next().unwrap();
        dist.next().unwrap();
        dist.reset();
        assert_eq!(dist.cursor(), DistributionCursor::default());
        assert_eq!(dist.next().unwrap().command, "A");
    }

    #[test]
    fn test_concurrent_pulls_are_balanced() {
        let dist = Arc::new(abc());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let dist = Arc::clone(&dist);
                std::thread::spawn(move || {
                    (0..300)
                        .map(|_| dist.next().unwrap().command)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            for command in handle.join().unwrap() {
                *counts.entry(command).or_default() += 1;
            }
        }

        // 1200 pulls over a 3-pattern: nothing skipped, nothing duplicated.
        assert_eq!(counts["A"], 400);
        assert_eq!(counts["B"], 400);
        assert_eq!(counts["C"], 400);
        assert_eq!(dist.cursor().produced, 1200);
    }
}
