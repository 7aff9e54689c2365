use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use super::RateLimiter;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
    /// Mutable so the adaptive wrapper can retune the refill rate in place.
    tokens_per_interval: f64,
}

/// `tokens_per_interval` refilled uniformly over `interval`, capped at
/// `max_burst` (§4.5). When `fair_queuing` is enabled, waiters are served
/// FIFO via an internal async mutex — tokio's mutex queues waiters in
/// arrival order, the same guarantee the spec asks for.
pub struct TokenBucketLimiter {
    interval: Duration,
    max_burst: f64,
    state: Mutex<BucketState>,
    fair_gate: Option<AsyncMutex<()>>,
}

impl TokenBucketLimiter {
    pub fn new(tokens_per_interval: u32, interval: Duration, max_burst: u32) -> Self {
        Self::with_fair_queuing(tokens_per_interval, interval, max_burst, true)
    }

    pub fn with_fair_queuing(
        tokens_per_interval: u32,
        interval: Duration,
        max_burst: u32,
        fair_queuing: bool,
    ) -> Self {
        Self {
            interval,
            max_burst: max_burst.max(tokens_per_interval).max(1) as f64,
            state: Mutex::new(BucketState {
                tokens: max_burst.max(1) as f64,
                last_refill: Instant::now(),
                tokens_per_interval: tokens_per_interval.max(1) as f64,
            }),
            fair_gate: fair_queuing.then(|| AsyncMutex::new(())),
        }
    }

    fn refill_locked(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        if elapsed.is_zero() {
            return;
        }
        let refilled =
            elapsed.as_secs_f64() / self.interval.as_secs_f64() * state.tokens_per_interval;
        state.tokens = (state.tokens + refilled).min(self.max_burst);
        state.last_refill = now;
    }

    /// Wait duration until at least one token is available, given the
    /// current (already refilled) state.
    fn wait_for_next_token(&self, state: &BucketState) -> Duration {
        let deficit = (1.0 - state.tokens).max(0.0);
        let secs = deficit / state.tokens_per_interval * self.interval.as_secs_f64();
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Retune the refill rate in place. Used by [`super::AdaptiveLimiter`].
    pub(super) fn set_rate(&self, new_rate: f64) {
        let mut state = self.state.lock();
        self.refill_locked(&mut state);
        state.tokens_per_interval = new_rate.max(0.01);
    }

    pub(super) fn rate(&self) -> f64 {
        self.state.lock().tokens_per_interval
    }

    fn try_consume(&self) -> bool {
        let mut state = self.state.lock();
        self.refill_locked(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn acquire(&self) {
        let _fair_permit = match &self.fair_gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };
        loop {
            let wait = {
                let mut state = self.state.lock();
                self.refill_locked(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    Some(self.wait_for_next_token(&state))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }

    fn try_acquire(&self) -> bool {
        self.try_consume()
    }

    async fn release(&self) {
        // No-op: tokens are consumed at acquire time.
    }

    async fn available(&self) -> u32 {
        let mut state = self.state.lock();
        self.refill_locked(&mut state);
        state.tokens.floor() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_drains_burst_then_waits() {
        let limiter = TokenBucketLimiter::new(10, Duration::from_millis(100), 2);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn refill_restores_tokens_over_time() {
        let limiter = TokenBucketLimiter::new(100, Duration::from_millis(100), 1);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test]
    async fn release_is_a_noop() {
        let limiter = TokenBucketLimiter::new(5, Duration::from_millis(100), 5);
        limiter.release().await;
        assert_eq!(limiter.available().await, 5);
    }
}
