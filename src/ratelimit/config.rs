//! Per-component rate limit configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Component name of the embedding step.
pub const EMBEDDING: &str = "embedding";
/// Component name of vector index queries.
pub const RETRIEVAL: &str = "retrieval";
/// Component name of vector index ingestion.
pub const INGESTION: &str = "ingestion";
/// Catch-all component used for names without their own entry.
pub const DEFAULT_COMPONENT: &str = "default";

/// Upper bound on configured durations, one year.
pub const MAX_DURATION_SECONDS: f64 = 365.0 * 24.0 * 3600.0;

/// Immutable limits for one named component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Token refill rate.
    pub requests_per_second: f64,

    /// Token bucket capacity.
    pub burst_size: u32,

    /// Length of the sliding window.
    pub window_size_seconds: f64,

    /// Longest delay a caller is suspended for before being rejected.
    pub max_delay_seconds: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(20.0, 40, 60.0, 5.0)
    }
}

impl RateLimitConfig {
    pub const fn new(
        requests_per_second: f64,
        burst_size: u32,
        window_size_seconds: f64,
        max_delay_seconds: f64,
    ) -> Self {
        Self {
            requests_per_second,
            burst_size,
            window_size_seconds,
            max_delay_seconds,
        }
    }

    /// Built-in defaults for a component name.
    pub fn for_component(name: &str) -> Self {
        match name {
            EMBEDDING => Self::new(10.0, 20, 60.0, 5.0),
            RETRIEVAL => Self::new(50.0, 100, 60.0, 2.0),
            INGESTION => Self::new(5.0, 10, 60.0, 30.0),
            _ => Self::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.requests_per_second.is_finite() && self.requests_per_second > 0.0) {
            return Err(ConfigurationError::invalid(
                "requests_per_second",
                format!("must be positive, got {}", self.requests_per_second),
            ));
        }
        if self.burst_size == 0 {
            return Err(ConfigurationError::invalid("burst_size", "must be at least 1"));
        }
        if !(self.window_size_seconds > 0.0 && self.window_size_seconds <= MAX_DURATION_SECONDS) {
            return Err(ConfigurationError::invalid(
                "window_size_seconds",
                format!(
                    "must be in (0, {MAX_DURATION_SECONDS}], got {}",
                    self.window_size_seconds
                ),
            ));
        }
        if !(self.max_delay_seconds >= 0.0 && self.max_delay_seconds <= MAX_DURATION_SECONDS) {
            return Err(ConfigurationError::invalid(
                "max_delay_seconds",
                format!(
                    "must be in [0, {MAX_DURATION_SECONDS}], got {}",
                    self.max_delay_seconds
                ),
            ));
        }
        if self.requests_per_second * self.window_size_seconds <= 0.0 {
            return Err(ConfigurationError::invalid(
                "requests_per_second",
                "admits no request per window",
            ));
        }
        Ok(())
    }

    /// Hard ceiling of admitted requests inside one window.
    pub fn max_requests_per_window(&self) -> usize {
        (self.requests_per_second * self.window_size_seconds)
            .ceil()
            .max(1.0) as usize
    }

    pub fn window(&self) -> Duration {
        Duration::try_from_secs_f64(self.window_size_seconds).unwrap_or(Duration::MAX)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.max_delay_seconds).unwrap_or(Duration::ZERO)
    }
}

/// Default configuration table: one entry per well-known component plus
/// the catch-all.
pub fn default_rate_limits() -> HashMap<String, RateLimitConfig> {
    [EMBEDDING, RETRIEVAL, INGESTION, DEFAULT_COMPONENT]
        .into_iter()
        .map(|name| (name.to_string(), RateLimitConfig::for_component(name)))
        .collect()
}
