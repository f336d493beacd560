//! Rate limiting for reachability probes.
//!
//! Token bucket ceiling on connection attempts per second, shared by every
//! probe worker.

use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota};
use std::num::NonZeroU32;
use std::sync::Arc;

type DirectLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// A shared connection-rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    limiter: Arc<DirectLimiter>,
}

impl RateLimiter {
    /// Create a limiter allowing `rate` attempts per second.
    ///
    /// Returns `None` for a zero rate, which means unlimited.
    pub fn per_second(rate: u32) -> Option<Self> {
        let rate = NonZeroU32::new(rate)?;
        Some(Self {
            limiter: Arc::new(DirectLimiter::direct(Quota::per_second(rate))),
        })
    }

    /// Wait until another attempt is allowed.
    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }

    /// Take a token without waiting.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_rate_is_unlimited() {
        assert!(RateLimiter::per_second(0).is_none());
    }

    #[tokio::test]
    async fn test_rate_limiter_wait() {
        let limiter = RateLimiter::per_second(1000).unwrap();
        assert!(limiter.try_acquire());
        limiter.wait().await;
    }

    #[test]
    fn test_clones_share_bucket() {
        let first = RateLimiter::per_second(1).unwrap();
        let second = first.clone();
        assert!(first.try_acquire());
        assert!(!second.try_acquire());
    }
}
