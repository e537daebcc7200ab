//! Token-bucket rate limiting for provider clients
//!
//! Calls block (with timeout) when the bucket is empty; each adapter owns
//! its own bucket.

use crate::error::DiligenceError;
use crate::Result;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct TokenBucket {
    name: &'static str,
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(name: &'static str, capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            name,
            capacity,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, waiting up to `timeout` for a refill
    pub async fn acquire(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }

                (1.0 - state.tokens) / self.refill_per_sec
            };

            let now = Instant::now();
            if now + Duration::from_secs_f64(wait) > deadline {
                return Err(DiligenceError::RateLimited(self.name.to_string()));
            }
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokens_drain_and_refill() {
        let bucket = TokenBucket::new("test", 2.0, 100.0);

        bucket.acquire(Duration::from_millis(1)).await.unwrap();
        bucket.acquire(Duration::from_millis(1)).await.unwrap();
        // Empty now, but refills at 100/s so a short wait suffices
        bucket.acquire(Duration::from_millis(100)).await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_bucket_times_out() {
        let bucket = TokenBucket::new("slow", 1.0, 0.001);
        bucket.acquire(Duration::from_millis(1)).await.unwrap();

        let err = bucket.acquire(Duration::from_millis(5)).await.unwrap_err();
        assert!(matches!(err, DiligenceError::RateLimited(_)));
    }
}
