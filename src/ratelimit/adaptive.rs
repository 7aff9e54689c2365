use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use super::{RateLimiter, TokenBucketLimiter};

/// Wraps a [`TokenBucketLimiter`] with feedback-driven rate adjustment
/// (§4.5): after 10 consecutive successes the rate is multiplied by 1.2 up
/// to `max_rate`; on a rate-limit signal, or after 3 consecutive failures,
/// it is multiplied by 0.5 down to `min_rate`.
pub struct AdaptiveLimiter {
    inner: TokenBucketLimiter,
    min_rate: f64,
    max_rate: f64,
    consecutive_successes: AtomicU32,
    consecutive_failures: AtomicU32,
}

impl AdaptiveLimiter {
    pub fn new(inner: TokenBucketLimiter, min_rate: f64, max_rate: f64) -> Self {
        Self {
            inner,
            min_rate,
            max_rate,
            consecutive_successes: AtomicU32::new(0),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn current_rate(&self) -> f64 {
        self.inner.rate()
    }

    fn speed_up(&self) {
        let next = (self.inner.rate() * 1.2).min(self.max_rate);
        self.inner.set_rate(next);
    }

    fn slow_down(&self) {
        let next = (self.inner.rate() * 0.5).max(self.min_rate);
        self.inner.set_rate(next);
    }
}

#[async_trait]
impl RateLimiter for AdaptiveLimiter {
    async fn acquire(&self) {
        self.inner.acquire().await;
    }

    fn try_acquire(&self) -> bool {
        self.inner.try_acquire()
    }

    async fn release(&self) {
        self.inner.release().await;
    }

    async fn available(&self) -> u32 {
        self.inner.available().await
    }

    fn report_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let count = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= 10 {
            self.consecutive_successes.store(0, Ordering::Relaxed);
            self.speed_up();
        }
    }

    fn report_failure(&self) {
        self.consecutive_successes.store(0, Ordering::Relaxed);
        let count = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= 3 {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            self.slow_down();
        }
    }

    fn report_rate_limited(&self) {
        self.consecutive_successes.store(0, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.slow_down();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn bucket(rate: u32) -> TokenBucketLimiter {
        TokenBucketLimiter::new(rate, Duration::from_millis(100), rate)
    }

    #[tokio::test]
    async fn speeds_up_after_ten_consecutive_successes() {
        let limiter = AdaptiveLimiter::new(bucket(10), 1.0, 100.0);
        for _ in 0..9 {
            limiter.report_success();
        }
        assert_eq!(limiter.current_rate(), 10.0);
        limiter.report_success();
        assert!(limiter.current_rate() > 10.0);
    }

    #[tokio::test]
    async fn slows_down_after_three_consecutive_failures() {
        let limiter = AdaptiveLimiter::new(bucket(10), 1.0, 100.0);
        limiter.report_failure();
        limiter.report_failure();
        assert_eq!(limiter.current_rate(), 10.0);
        limiter.report_failure();
        assert_eq!(limiter.current_rate(), 5.0);
    }

    #[tokio::test]
    async fn rate_limited_signal_slows_down_immediately() {
        let limiter = AdaptiveLimiter::new(bucket(10), 1.0, 100.0);
        limiter.report_rate_limited();
        assert_eq!(limiter.current_rate(), 5.0);
    }

    #[tokio::test]
    async fn rate_never_drops_below_min() {
        let limiter = AdaptiveLimiter::new(bucket(2), 1.0, 100.0);
        for _ in 0..10 {
            limiter.report_rate_limited();
        }
        assert!(limiter.current_rate() >= 1.0);
    }
}
