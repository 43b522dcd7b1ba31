//! Rate Limiter (Token Bucket Algorithm)
//!
//! Guards the mutating RPC methods (enqueue, actions) against request floods.
//! Lock-free: the bucket lives in a single atomic word.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Default burst size
pub const DEFAULT_BURST: u32 = 200;

/// Default refill rate (tokens per second)
pub const DEFAULT_RATE_PER_SEC: u32 = 100;

/// Bits of the packed word holding the token count
const TOKEN_BITS: u32 = 24;

/// Largest burst the packed word can hold
pub const MAX_BURST: u32 = (1 << TOKEN_BITS) - 1;

/// Largest refill timestamp (about 34 years of uptime)
const MAX_STAMP_MS: u64 = (1 << (64 - TOKEN_BITS)) - 1;

/// Token bucket shared by every connection
pub struct RateLimiter {
    // Upper 24 bits: available tokens
    // Lower 40 bits: milliseconds since `origin` at the last refill
    packed: AtomicU64,
    origin: Instant,
    burst: u32,
    rate_per_sec: u32,
}

fn pack(tokens: u32, at_ms: u64) -> u64 {
    ((tokens as u64) << (64 - TOKEN_BITS)) | (at_ms & MAX_STAMP_MS)
}

fn unpack(packed: u64) -> (u32, u64) {
    ((packed >> (64 - TOKEN_BITS)) as u32, packed & MAX_STAMP_MS)
}

impl RateLimiter {
    /// Allow `rate_per_sec` requests per second with bursts up to `burst`
    /// (clamped to 1..=MAX_BURST)
    pub fn new(burst: u32, rate_per_sec: u32) -> Self {
        let burst = burst.clamp(1, MAX_BURST);
        Self {
            packed: AtomicU64::new(pack(burst, 0)),
            origin: Instant::now(),
            burst,
            rate_per_sec,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.origin.elapsed().as_millis().min(MAX_STAMP_MS as u128) as u64
    }

    /// Refilled token count at `now_ms`, and the refill timestamp to store.
    ///
    /// Only whole tokens are credited; the timestamp advances by the time
    /// those tokens took so partial progress is not thrown away.
    fn refill(&self, tokens: u32, last_ms: u64, now_ms: u64) -> (u32, u64) {
        if self.rate_per_sec == 0 {
            return (tokens, now_ms);
        }
        let delta_ms = now_ms.saturating_sub(last_ms);
        let earned = delta_ms.saturating_mul(self.rate_per_sec as u64) / 1000;
        if earned == 0 {
            return (tokens, last_ms);
        }
        let refilled = (tokens as u64).saturating_add(earned).min(self.burst as u64) as u32;
        if refilled == self.burst {
            return (refilled, now_ms);
        }
        let spent_ms = earned * 1000 / self.rate_per_sec as u64;
        (refilled, last_ms + spent_ms)
    }

    /// Take one token. Returns false when the caller should be throttled.
    pub fn try_acquire(&self) -> bool {
        loop {
            let current = self.packed.load(Ordering::Acquire);
            let (tokens, last_ms) = unpack(current);
            let (available, at_ms) = self.refill(tokens, last_ms, self.elapsed_ms());

            if available == 0 {
                return false;
            }

            let next = pack(available - 1, at_ms);
            if self
                .packed
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Tokens left right now (for logging)
    pub fn available(&self) -> u32 {
        let (tokens, last_ms) = unpack(self.packed.load(Ordering::Acquire));
        self.refill(tokens, last_ms, self.elapsed_ms()).0
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_BURST, DEFAULT_RATE_PER_SEC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::{sleep, Duration};

    #[test]
    fn test_allows_burst_then_throttles() {
        let limiter = RateLimiter::new(10, 0);

        for _ in 0..10 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.available(), 0);
    }

    #[test]
    fn test_refill_credits_whole_tokens() {
        let limiter = RateLimiter::new(5, 10);

        // 10/s: one token per 100ms
        assert_eq!(limiter.refill(0, 0, 99), (0, 0));
        assert_eq!(limiter.refill(0, 0, 250), (2, 200));
        assert_eq!(limiter.refill(3, 0, 10_000), (5, 10_000));
    }

    #[test]
    fn test_refill_past_fifty_days() {
        let limiter = RateLimiter::new(5, 10);
        let fifty_days = u32::MAX as u64;

        // Empty bucket drained just before the 32-bit millisecond mark
        assert_eq!(limiter.refill(0, fifty_days, fifty_days + 1_000), (5, fifty_days + 1_000));
        assert_eq!(limiter.refill(0, fifty_days - 50, fifty_days + 50), (1, fifty_days + 50));

        let (tokens, at_ms) = unpack(pack(7, fifty_days * 3));
        assert_eq!((tokens, at_ms), (7, fifty_days * 3));
    }

    #[test]
    fn test_burst_clamped_to_packed_width() {
        let limiter = RateLimiter::new(u32::MAX, 0);
        assert_eq!(limiter.available(), MAX_BURST);
    }

    #[tokio::test]
    async fn test_refills_over_time() {
        let limiter = RateLimiter::new(5, 10);

        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());

        sleep(Duration::from_millis(300)).await;

        assert!(limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_bucket() {
        let limiter = Arc::new(RateLimiter::new(100, 0));

        let mut handles = vec![];
        for _ in 0..10 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                (0..20).filter(|_| limiter.try_acquire()).count()
            }));
        }

        let mut total_allowed = 0;
        for handle in handles {
            total_allowed += handle.await.unwrap();
        }

        assert_eq!(total_allowed, 100);
    }
}
