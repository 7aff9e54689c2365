//! Rate Limiter (§4.5): token-bucket admission control shared by the
//! executor, plus an adaptive wrapper and a sliding-window alternative with
//! an identical public contract.

mod adaptive;
mod bucket;
mod sliding;

pub use adaptive::AdaptiveLimiter;
pub use bucket::TokenBucketLimiter;
pub use sliding::SlidingWindowLimiter;

use async_trait::async_trait;

/// Shared contract for all rate limiter variants. `release` is a no-op on
/// the token bucket (tokens are consumed at acquire time) but is required by
/// the interface for symmetry with windowed limiters that track in-flight
/// leases.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Blocks until a token is available, then consumes it.
    async fn acquire(&self);

    /// Non-blocking: consumes a token and returns `true` if one was
    /// immediately available, otherwise returns `false` without waiting.
    fn try_acquire(&self) -> bool;

    /// Releases a previously acquired token back to the limiter. A no-op for
    /// bucket-style limiters.
    async fn release(&self);

    /// Approximate count of tokens currently available.
    async fn available(&self) -> u32;

    /// Feedback hooks consumed by the adaptive variant; no-ops elsewhere.
    fn report_success(&self) {}
    fn report_failure(&self) {}
    fn report_rate_limited(&self) {}
}
