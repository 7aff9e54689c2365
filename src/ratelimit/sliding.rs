use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::RateLimiter;

/// Alternative rate limiter implementation: at most `max_requests` acquires
/// may land within any trailing `window`, tracked by a deque of timestamps.
/// Same public contract as [`super::TokenBucketLimiter`] (§4.5).
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    fn evict_expired(&self, timestamps: &mut VecDeque<Instant>) {
        let cutoff = Instant::now() - self.window;
        while matches!(timestamps.front(), Some(t) if *t < cutoff) {
            timestamps.pop_front();
        }
    }

    fn try_consume(&self) -> bool {
        let mut timestamps = self.timestamps.lock();
        self.evict_expired(&mut timestamps);
        if timestamps.len() < self.max_requests {
            timestamps.push_back(Instant::now());
            true
        } else {
            false
        }
    }

    /// How long until the oldest entry ages out, freeing a slot.
    fn wait_for_slot(&self, timestamps: &VecDeque<Instant>) -> Duration {
        match timestamps.front() {
            Some(oldest) => {
                let elapsed = oldest.elapsed();
                self.window.saturating_sub(elapsed)
            }
            None => Duration::ZERO,
        }
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn acquire(&self) {
        loop {
            let wait = {
                let mut timestamps = self.timestamps.lock();
                self.evict_expired(&mut timestamps);
                if timestamps.len() < self.max_requests {
                    timestamps.push_back(Instant::now());
                    None
                } else {
                    Some(self.wait_for_slot(&timestamps))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d.max(Duration::from_millis(1))).await,
            }
        }
    }

    fn try_acquire(&self) -> bool {
        self.try_consume()
    }

    async fn release(&self) {
        // No-op: slots free up naturally as timestamps age out of the window.
    }

    async fn available(&self) -> u32 {
        let mut timestamps = self.timestamps.lock();
        self.evict_expired(&mut timestamps);
        (self.max_requests - timestamps.len()) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_max_requests_per_window() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_millis(100));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn slot_frees_once_window_elapses() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_millis(20));
        assert!(limiter.try_acquire());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(limiter.try_acquire());
    }
}
