//! Launch-rate throttling for task starts

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};

/// Token-bucket limiter on task starts, backed by `governor`
///
/// One instance is shared by every unit of a pool, so the rate is pool-wide.
pub struct TaskRateLimiter {
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    rate: Option<f64>,
}

impl TaskRateLimiter {
    /// Create a limiter for `rate` task starts per second
    ///
    /// `None`, zero, negative or non-finite rates disable throttling. Rates
    /// below one per second are honoured as one start every `1 / rate`
    /// seconds.
    ///
    /// # Examples
    /// ```
    /// use memstress_core::worker::TaskRateLimiter;
    ///
    /// let limiter = TaskRateLimiter::new(Some(20.0));
    /// assert!(limiter.is_enabled());
    ///
    /// let unlimited = TaskRateLimiter::new(None);
    /// assert!(!unlimited.is_enabled());
    /// ```
    pub fn new(rate: Option<f64>) -> Self {
        let limiter = rate.and_then(Self::quota).map(RateLimiter::direct);
        Self { limiter, rate }
    }

    /// A limiter that never waits
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    fn quota(rate: f64) -> Option<Quota> {
        if !rate.is_finite() || rate <= 0.0 {
            return None;
        }
        if rate >= 1.0 {
            let per_second = NonZeroU32::new(rate.round().min(u32::MAX as f64) as u32)?;
            Some(Quota::per_second(per_second))
        } else {
            Quota::with_period(Duration::from_secs_f64(1.0 / rate))
        }
    }

    /// Wait until a task start is allowed
    pub async fn wait(&self) {
        if let Some(ref limiter) = self.limiter {
            limiter.until_ready().await;
        }
    }

    /// Take a permit without waiting
    ///
    /// Always `true` when throttling is disabled.
    pub fn try_acquire(&self) -> bool {
        match &self.limiter {
            Some(limiter) => limiter.check().is_ok(),
            None => true,
        }
    }

    /// Whether throttling is active
    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }

    /// Configured rate in starts per second
    pub fn rate(&self) -> Option<f64> {
        self.rate
    }
}

impl Default for TaskRateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl std::fmt::Debug for TaskRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRateLimiter")
            .field("rate", &self.rate)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
