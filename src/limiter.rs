//! Per-credential token-bucket rate limiting.
//!
//! Each network worker is bound to exactly one credential and one
//! [`RateLimiter`]; a worker acquires one token before every outbound
//! request, including retries. Buckets hold at most one token, so a
//! limiter admits isolated requests at the configured refill rate with no
//! burst beyond the first.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// A token bucket refilling at a fixed rate, with cancellation-aware
/// admission.
#[derive(Debug)]
pub struct RateLimiter {
    /// Tokens added per second.
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// A limiter admitting `rate` requests per second with a burst of one.
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            burst: 1.0,
            bucket: Mutex::new(Bucket {
                tokens: 1.0,
                refilled_at: Instant::now(),
            }),
        }
    }

    /// Block until one unit is admitted, or until `cancel` fires.
    ///
    /// Returns `false` on cancellation; the caller must not send.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
                bucket.refilled_at = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return true;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate)
            };

            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_acquire_is_immediate() {
        let limiter = RateLimiter::new(0.5);
        let cancel = CancellationToken::new();
        let start = Instant::now();
        assert!(limiter.acquire(&cancel).await);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_acquire_waits_for_refill() {
        let limiter = RateLimiter::new(2.0);
        let cancel = CancellationToken::new();

        assert!(limiter.acquire(&cancel).await);
        let start = Instant::now();
        assert!(limiter.acquire(&cancel).await);
        // 2 tokens/sec means the second admission lands ~500ms later.
        assert!(start.elapsed() >= Duration::from_millis(499));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_unblocks_waiter() {
        let limiter = RateLimiter::new(0.001);
        let cancel = CancellationToken::new();
        assert!(limiter.acquire(&cancel).await);

        cancel.cancel();
        assert!(!limiter.acquire(&cancel).await);
    }
}
