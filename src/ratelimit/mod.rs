//! Admission control for downstream components.
//!
//! Each named component (embedding, retrieval, ingestion, ...) gets its own
//! [`RateLimiter`] from a [`LimiterRegistry`]. A check either admits at
//! once, suspends the caller for a bounded delay, or fails with
//! [`RateLimitExceeded`](crate::error::RateLimitExceeded).

mod bucket;
mod config;
mod limiter;
mod registry;
mod window;

pub use bucket::TokenBucket;
pub use config::{
    DEFAULT_COMPONENT, EMBEDDING, INGESTION, MAX_DURATION_SECONDS, RETRIEVAL, RateLimitConfig,
    default_rate_limits,
};
pub use limiter::{Admission, RateLimitMetrics, RateLimiter};
pub use registry::LimiterRegistry;
pub use window::SlidingWindow;
