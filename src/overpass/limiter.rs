//! Token-bucket rate limiter for outbound queries.

use std::time::Duration;
use tokio::time::Instant;

/// Token bucket: `capacity` tokens, refilled at `refill_per_sec`.
///
/// `acquire` suspends the caller until a token is available. The run is
/// single-threaded cooperative, so the limiter is owned by the client
/// and needs no locking.
pub struct RateLimiter {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Panics unless the bucket can ever hand out a token: the refill
    /// rate must be positive and the capacity at least one token.
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        assert!(refill_per_sec > 0.0, "refill rate must be positive");
        assert!(capacity >= 1.0, "capacity must hold at least one token");
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    /// Wait until a token is available, then take it.
    pub async fn acquire(&mut self) {
        loop {
            self.refill();
            if self.tokens >= 1.0 {
                self.tokens -= 1.0;
                return;
            }
            let deficit = 1.0 - self.tokens;
            let wait = Duration::from_secs_f64(deficit / self.refill_per_sec);
            tokio::time::sleep(wait).await;
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }
}
