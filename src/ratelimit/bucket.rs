//! Token bucket.
//!
//! Refills at `rate` tokens per second up to `capacity`, lazily on every
//! acquire attempt. A delayed admission may reserve tokens it does not have
//! yet, driving the balance negative so later callers queue behind it.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    capacity: f64,
    rate: f64,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(rate: f64, capacity: u32, now: Instant) -> Self {
        let capacity = f64::from(capacity);
        Self {
            tokens: capacity,
            last_refill: now,
            capacity,
            rate,
        }
    }

    /// Adds `elapsed × rate` tokens, capped at capacity.
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Takes `count` tokens if they are all available.
    pub fn try_acquire(&mut self, count: f64) -> bool {
        if self.tokens >= count {
            self.tokens -= count;
            true
        } else {
            false
        }
    }

    /// Time until `count` tokens will be available, saturating at
    /// `Duration::MAX`.
    pub fn wait_time(&self, count: f64) -> Duration {
        let missing = (count - self.tokens).max(0.0);
        Duration::try_from_secs_f64(missing / self.rate).unwrap_or(Duration::MAX)
    }

    /// Takes `count` tokens unconditionally.
    pub fn reserve(&mut self, count: f64) {
        self.tokens -= count;
    }

    /// Returns tokens from an abandoned reservation.
    pub fn refund(&mut self, count: f64) {
        self.tokens = (self.tokens + count).min(self.capacity);
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_wait() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(2.0, 2, start);

        assert!(bucket.try_acquire(1.0));
        assert!(bucket.try_acquire(1.0));
        assert!(!bucket.try_acquire(1.0));
        assert_eq!(bucket.wait_time(1.0), Duration::from_millis(500));

        bucket.refill(start + Duration::from_millis(500));
        assert!(bucket.try_acquire(1.0));
    }

    #[test]
    fn test_wait_time_saturates_for_tiny_rates() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(1e-15, 1, start);
        assert!(bucket.try_acquire(1.0));
        assert_eq!(bucket.wait_time(1.0), Duration::MAX);
    }

    #[test]
    fn test_refill_caps_at_capacity() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(10.0, 3, start);
        bucket.refill(start + Duration::from_secs(60));
        assert_eq!(bucket.tokens(), 3.0);
    }

    #[test]
    fn test_reservation_debt_and_refund() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(1.0, 1, start);
        assert!(bucket.try_acquire(1.0));

        bucket.reserve(1.0);
        assert_eq!(bucket.tokens(), -1.0);
        // A second caller now waits for the debt plus its own token
        assert_eq!(bucket.wait_time(1.0), Duration::from_secs(2));

        bucket.refund(1.0);
        assert_eq!(bucket.tokens(), 0.0);
    }
}
