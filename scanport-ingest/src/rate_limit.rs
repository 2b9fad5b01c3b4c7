//! Rate limiting for tasks that hit external-service quotas
//!
//! Two token buckets share one window. Below the soft limit a call proceeds
//! immediately; past it the caller waits for a replenished cell. A call that
//! would exceed the hard limit fails instead of waiting.

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;

use crate::error::{IngestError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSettings {
    pub soft_limit: usize,
    pub hard_limit: usize,
    pub window_sec: u64,
}

pub struct RateLimiter {
    settings: RateLimitSettings,
    soft: DefaultDirectRateLimiter,
    hard: DefaultDirectRateLimiter,
}

/// `limit` calls per `window`, all of them available as an initial burst
fn window_quota(limit: usize, window: Duration) -> Quota {
    let burst = NonZeroU32::new(u32::try_from(limit).unwrap_or(u32::MAX)).unwrap_or(NonZeroU32::MIN);
    Quota::with_period(window / burst.get())
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        let window = Duration::from_secs(settings.window_sec.max(1));
        Self {
            settings,
            soft: governor::RateLimiter::direct(window_quota(settings.soft_limit, window)),
            hard: governor::RateLimiter::direct(window_quota(settings.hard_limit, window)),
        }
    }

    pub fn settings(&self) -> RateLimitSettings {
        self.settings
    }

    /// Record one call, waiting or failing per the configured limits
    pub async fn acquire(&self, what: &str) -> Result<()> {
        if let Err(not_until) = self.hard.check() {
            let retry_in = not_until.wait_time_from(DefaultClock::default().now());
            return Err(IngestError::RateLimited(format!(
                "Rate limit exceeded for {}: more than {} calls in {}s (retry in {}ms)",
                what,
                self.settings.hard_limit,
                self.settings.window_sec,
                retry_in.as_millis()
            )));
        }

        if self.soft.check().is_err() {
            tracing::debug!(operation = what, soft_limit = self.settings.soft_limit, "Rate limiting: waiting");
            self.soft.until_ready().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn limiter(soft: usize, hard: usize, window_sec: u64) -> RateLimiter {
        RateLimiter::new(RateLimitSettings {
            soft_limit: soft,
            hard_limit: hard,
            window_sec,
        })
    }

    #[tokio::test]
    async fn test_under_soft_limit_is_immediate() {
        let limiter = limiter(3, 5, 60);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire("test").await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_hard_limit_fails() {
        let limiter = limiter(10, 2, 60);
        limiter.acquire("test").await.unwrap();
        limiter.acquire("test").await.unwrap();
        let err = limiter.acquire("test").await.unwrap_err();
        assert!(matches!(err, IngestError::RateLimited(_)));
        assert!(err.to_string().contains("more than 2 calls in 60s"), "{}", err);
    }

    #[tokio::test]
    async fn test_soft_limit_waits_for_replenished_cell() {
        let limiter = limiter(1, 10, 1);
        limiter.acquire("test").await.unwrap();

        let start = Instant::now();
        limiter.acquire("test").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_waiting_caller_does_not_block_others() {
        // One cell per second: the first caller takes it, the next two
        // each wait for their own replenished cell
        let limiter = Arc::new(limiter(1, 10, 1));
        limiter.acquire("first").await.unwrap();

        let start = Instant::now();
        let a = tokio::spawn({
            let limiter = Arc::clone(&limiter);
            async move { limiter.acquire("a").await }
        });
        let b = tokio::spawn({
            let limiter = Arc::clone(&limiter);
            async move { limiter.acquire("b").await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1900), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(3500), "{:?}", elapsed);
    }
}
