// =============================================================================
// Rate Limiter — token bucket sized by requests-per-second
// =============================================================================
//
// Public market-data reads never carry Binance's weight-usage headers the
// way signed trading endpoints do, so there is nothing to read back and
// reconcile against. Instead this tracks a simple token bucket: a fixed
// budget refilled once per second, decremented per outgoing request, with
// callers blocking (async) rather than being rejected when the bucket is
// empty.
// =============================================================================

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

/// Token-bucket limiter. `capacity` tokens are available per `refill_interval`;
/// `acquire()` waits until a token is available rather than failing.
pub struct RateLimiter {
    capacity: u32,
    tokens: AtomicU32,
    refill_interval: Duration,
    last_refill_ms: AtomicU64,
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl RateLimiter {
    /// `requests_per_second` tokens, refilled every second.
    pub fn new(requests_per_second: u32) -> Self {
        Self {
            capacity: requests_per_second.max(1),
            tokens: AtomicU32::new(requests_per_second.max(1)),
            refill_interval: Duration::from_secs(1),
            last_refill_ms: AtomicU64::new(now_ms()),
        }
    }

    fn maybe_refill(&self) {
        let now = now_ms();
        let last = self.last_refill_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) >= self.refill_interval.as_millis() as u64
            && self
                .last_refill_ms
                .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            let prev = self.tokens.swap(self.capacity, Ordering::Relaxed);
            if prev == 0 {
                debug!(capacity = self.capacity, "rate limiter bucket refilled");
            }
        }
    }

    /// Block until a token is available, then consume it.
    pub async fn acquire(&self) {
        loop {
            self.maybe_refill();
            let current = self.tokens.load(Ordering::Relaxed);
            if current > 0
                && self
                    .tokens
                    .compare_exchange(current, current - 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
            {
                return;
            }
            warn!("rate limiter bucket empty, waiting for refill");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Current token count, for diagnostics/snapshots.
    pub fn available(&self) -> u32 {
        self.maybe_refill();
        self.tokens.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_drains_bucket() {
        let limiter = RateLimiter::new(3);
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(limiter.available(), 0);
    }

    #[tokio::test]
    async fn acquire_refills_after_interval() {
        let limiter = RateLimiter::new(1);
        limiter.acquire().await;
        assert_eq!(limiter.available(), 0);
        limiter.last_refill_ms.store(0, Ordering::Relaxed);
        assert_eq!(limiter.available(), 1);
    }
}
