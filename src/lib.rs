//! Retrieval-serving core for document question answering.
//!
//! A sharded vector index sits behind per-component admission control, and
//! results are delivered as bounded streams.

pub mod config;
pub mod encoder;
pub mod error;
pub mod logging;
pub mod ratelimit;
pub mod service;
pub mod streaming;
pub mod vector;

// Explicit exports for better API clarity
pub use config::Settings;
pub use encoder::{Encoder, HashingEncoder};
pub use error::{
    ConfigurationError, EncodeError, Error, IndexError, IndexResult, RateLimitExceeded, Result,
    StreamError, StreamResult,
};
pub use ratelimit::{Admission, LimiterRegistry, RateLimitConfig, RateLimitMetrics, RateLimiter};
pub use service::{IndexStats, RetrievalService, SearchHit, ShardStats};
pub use streaming::{
    ResultStreamer, StreamBuffer, StreamChunk, StreamMetadata, StreamProcessor, StreamedRecord,
    StreamingConfig,
};
pub use vector::{IndexConfig, Neighbor, SearchResults, ShardKind, ShardedIndex, VectorId};
