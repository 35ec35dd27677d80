//! Two-layer admission control for one component.
//!
//! A token bucket absorbs bursts up to `burst_size`, and a sliding window
//! enforces `ceil(rps × window)` admissions per window on top of it. When
//! neither layer can admit right away the caller is suspended for the larger
//! of the two waits, or rejected when that exceeds `max_delay_seconds`.

use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use super::bucket::TokenBucket;
use super::config::RateLimitConfig;
use super::window::SlidingWindow;
use crate::error::{ConfigurationError, RateLimitExceeded};

/// Outcome of a successful [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// How long the caller was suspended before being admitted.
    pub delay: Duration,
}

impl Admission {
    pub fn was_delayed(&self) -> bool {
        !self.delay.is_zero()
    }
}

/// Snapshot of a limiter's cumulative counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitMetrics {
    pub component: String,
    pub total_requests: u64,
    pub rejected_requests: u64,
    pub delayed_requests: u64,
    pub total_delay_seconds: f64,
}

impl RateLimitMetrics {
    pub fn rejection_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.rejected_requests as f64 / self.total_requests as f64
        }
    }

    pub fn average_delay(&self) -> f64 {
        if self.delayed_requests == 0 {
            0.0
        } else {
            self.total_delay_seconds / self.delayed_requests as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    rejected: u64,
    delayed: u64,
    total_delay: Duration,
}

#[derive(Debug)]
struct LimiterState {
    bucket: TokenBucket,
    window: SlidingWindow,
    counters: Counters,
}

/// Rate limiter for one named component.
#[derive(Debug)]
pub struct RateLimiter {
    component: String,
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(
        component: impl Into<String>,
        config: RateLimitConfig,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let now = Instant::now();
        let state = LimiterState {
            bucket: TokenBucket::new(config.requests_per_second, config.burst_size, now),
            window: SlidingWindow::new(config.window(), config.max_requests_per_window()),
            counters: Counters::default(),
        };
        Ok(Self {
            component: component.into(),
            config,
            state: Mutex::new(state),
        })
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admits one request.
    pub async fn check(&self) -> Result<Admission, RateLimitExceeded> {
        self.check_tokens(1).await
    }

    /// Admits a request costing `tokens`.
    ///
    /// Returns immediately when the bucket holds enough tokens. Otherwise the
    /// tokens are reserved and the caller sleeps until they would have been
    /// available; dropping the future during that sleep hands the
    /// reservation back.
    pub async fn check_tokens(&self, tokens: u32) -> Result<Admission, RateLimitExceeded> {
        let tokens = f64::from(tokens);
        let (delay, admitted_at) = {
            let mut state = self.state.lock();
            let now = Instant::now();
            state.counters.total += 1;
            state.bucket.refill(now);
            state.window.evict(now);

            if state.bucket.try_acquire(tokens) {
                state.window.record(now);
                return Ok(Admission {
                    delay: Duration::ZERO,
                });
            }

            let bucket_wait = state.bucket.wait_time(tokens);
            let window_wait = state.window.wait_time(now);
            let delay = bucket_wait.max(window_wait);

            if delay > self.config.max_delay() {
                state.counters.rejected += 1;
                tracing::warn!(
                    component = %self.component,
                    required_delay_ms = delay.as_millis() as u64,
                    "rate limit exceeded"
                );
                return Err(RateLimitExceeded {
                    component: self.component.clone(),
                    required_delay: delay,
                    max_delay: self.config.max_delay(),
                });
            }

            let admitted_at = now + delay;
            state.bucket.reserve(tokens);
            state.window.record(admitted_at);
            state.counters.delayed += 1;
            state.counters.total_delay += delay;
            (delay, admitted_at)
        };

        tracing::debug!(
            component = %self.component,
            delay_ms = delay.as_millis() as u64,
            "delaying request"
        );

        let mut reservation = Reservation {
            limiter: self,
            tokens,
            admitted_at,
            armed: true,
        };
        tokio::time::sleep(delay).await;
        reservation.armed = false;

        Ok(Admission { delay })
    }

    pub fn metrics(&self) -> RateLimitMetrics {
        let state = self.state.lock();
        RateLimitMetrics {
            component: self.component.clone(),
            total_requests: state.counters.total,
            rejected_requests: state.counters.rejected,
            delayed_requests: state.counters.delayed,
            total_delay_seconds: state.counters.total_delay.as_secs_f64(),
        }
    }

    /// Tokens currently in the bucket, after refilling. Negative while
    /// delayed callers hold reservations.
    pub fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock();
        state.bucket.refill(Instant::now());
        state.bucket.tokens()
    }
}

/// Tokens and window slot held by a caller sleeping in `check_tokens`.
struct Reservation<'a> {
    limiter: &'a RateLimiter,
    tokens: f64,
    admitted_at: Instant,
    armed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.limiter.state.lock();
        state.bucket.refund(self.tokens);
        state.window.remove(self.admitted_at);
        tracing::debug!(component = %self.limiter.component, "delayed request cancelled");
    }
}
