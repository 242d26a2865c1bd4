//! Query admission rate limiting
//!
//! A single leaky bucket guards the query path: tokens drip in at the
//! configured rate and the bucket holds at most one second of burst. Both
//! the rate and each acquisition are expanded by 1000, which keeps the
//! bucket usable for fractional QPS limits.

use parking_lot::Mutex;
use std::time::Instant;

/// Tokens consumed per admitted query.
pub const TOKENS_PER_QUERY: u64 = 1000;

/// Leaky bucket for query admission
#[derive(Debug)]
pub struct LeakyBucket {
    /// Drip rate in tokens per second; also the burst ceiling
    rate: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    /// Fractional, so sub-token drip between frequent acquisitions is not
    /// rounded away
    available: f64,
    last_drip: Instant,
}

impl LeakyBucket {
    /// Create a bucket admitting `qps` queries per second, starting full.
    pub fn new(qps: u64) -> Self {
        let rate = qps.saturating_mul(TOKENS_PER_QUERY).max(1) as f64;
        Self {
            rate,
            state: Mutex::new(BucketState {
                available: rate,
                last_drip: Instant::now(),
            }),
        }
    }

    /// Take `tokens` from the bucket, returning whether the caller is
    /// admitted. A rejected acquisition takes nothing.
    pub fn acquire(&self, tokens: u64) -> bool {
        let mut state = self.state.lock();
        self.drip(&mut state);
        if state.available < tokens as f64 {
            return false;
        }
        state.available -= tokens as f64;
        true
    }

    /// Whole tokens currently in the bucket.
    pub fn available(&self) -> u64 {
        let mut state = self.state.lock();
        self.drip(&mut state);
        state.available as u64
    }

    fn drip(&self, state: &mut BucketState) {
        let now = Instant::now();
        let dripped = now.duration_since(state.last_drip).as_secs_f64() * self.rate;
        state.available = (state.available + dripped).min(self.rate);
        state.last_drip = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_admits_up_to_rate() {
        let bucket = LeakyBucket::new(2);

        assert!(bucket.acquire(TOKENS_PER_QUERY));
        assert!(bucket.acquire(TOKENS_PER_QUERY));
        assert!(!bucket.acquire(TOKENS_PER_QUERY));
    }

    #[test]
    fn test_rejected_acquisition_takes_nothing() {
        let bucket = LeakyBucket::new(1);

        assert!(!bucket.acquire(2 * TOKENS_PER_QUERY));
        // the failed oversized acquire left the bucket intact
        assert!(bucket.acquire(TOKENS_PER_QUERY));
    }

    #[test]
    fn test_bucket_overflow_rejects_at_least_one() {
        let bucket = LeakyBucket::new(1000);

        let admitted = (0..1001)
            .filter(|_| bucket.acquire(TOKENS_PER_QUERY))
            .count();
        assert!(admitted <= 1000);
    }
}
