//! Backpressure-aware result streaming.
//!
//! Results are split into [`StreamChunk`]s, pushed through a bounded
//! [`StreamBuffer`] by a producer task and drained by a [`StreamProcessor`]
//! that applies a transform per chunk or per batch. [`ResultStreamer`] wires
//! the three together for materialized result lists.

mod buffer;
mod chunk;
mod processor;
mod streamer;

pub use buffer::StreamBuffer;
pub use chunk::{StreamChunk, chunk_records};
pub use processor::{ChunkTransform, ProcessedStream, StreamProcessor};
pub use streamer::{RecordStream, ResultStreamer, StreamMetadata, StreamedRecord, StreamingConfig};
