//! Chunked delivery of materialized result lists.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;

use super::buffer::StreamBuffer;
use super::chunk::chunk_records;
use super::processor::{ProcessedStream, StreamProcessor};
use crate::error::{ConfigurationError, StreamError, StreamResult};
use crate::ratelimit::MAX_DURATION_SECONDS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Records per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Chunks the buffer holds before producers wait
    #[serde(default = "default_buffer_max_size")]
    pub buffer_max_size: usize,

    /// Timeout of a single buffer put or get
    #[serde(default = "default_chunk_timeout_seconds")]
    pub chunk_timeout_seconds: f64,

    /// Chunks per transform call, one at a time when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

fn default_chunk_size() -> usize {
    10
}

fn default_buffer_max_size() -> usize {
    100
}

fn default_chunk_timeout_seconds() -> f64 {
    30.0
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            buffer_max_size: default_buffer_max_size(),
            chunk_timeout_seconds: default_chunk_timeout_seconds(),
            batch_size: None,
        }
    }
}

impl StreamingConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.chunk_size == 0 {
            return Err(ConfigurationError::invalid("chunk_size", "must be at least 1"));
        }
        if self.buffer_max_size == 0 {
            return Err(ConfigurationError::invalid(
                "buffer_max_size",
                "must be at least 1",
            ));
        }
        if !(self.chunk_timeout_seconds > 0.0
            && self.chunk_timeout_seconds <= MAX_DURATION_SECONDS)
        {
            return Err(ConfigurationError::invalid(
                "chunk_timeout_seconds",
                format!(
                    "must be in (0, {MAX_DURATION_SECONDS}], got {}",
                    self.chunk_timeout_seconds
                ),
            ));
        }
        if self.batch_size == Some(0) {
            return Err(ConfigurationError::invalid("batch_size", "must be at least 1"));
        }
        Ok(())
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.chunk_timeout_seconds).unwrap_or(Duration::MAX)
    }
}

/// Where a streamed record came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub chunk_index: usize,
    pub total_chunks: Option<usize>,
    /// Zero-based position of the record in the original list.
    pub position: usize,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamedRecord<T> {
    pub record: T,
    pub stream: StreamMetadata,
}

/// Splits result lists into chunks and streams them through a bounded
/// buffer.
#[derive(Debug, Clone)]
pub struct ResultStreamer {
    config: StreamingConfig,
}

impl ResultStreamer {
    pub fn new(config: StreamingConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Streams `results` chunk by chunk. `chunk_size` overrides the
    /// configured size for this call.
    ///
    /// A producer task fills the buffer while the returned stream drains it,
    /// so at most `buffer_max_size` chunks are queued at any time.
    pub fn stream_chunks<T>(
        &self,
        results: Vec<T>,
        chunk_size: Option<usize>,
    ) -> Result<ProcessedStream<Vec<T>>, ConfigurationError>
    where
        T: Send + 'static,
    {
        let chunk_size = chunk_size.unwrap_or(self.config.chunk_size);
        if chunk_size == 0 {
            return Err(ConfigurationError::invalid("chunk_size", "must be at least 1"));
        }

        let buffer = Arc::new(StreamBuffer::new(
            self.config.buffer_max_size,
            self.config.chunk_timeout(),
        )?);
        let processor = StreamProcessor::passthrough(Arc::clone(&buffer))
            .with_batch_size(self.config.batch_size)?;

        let record_count = results.len();
        let chunks = chunk_records(results, chunk_size);
        tracing::debug!(
            records = record_count,
            chunks = chunks.len(),
            chunk_size,
            "streaming results"
        );

        tokio::spawn(async move {
            for chunk in chunks {
                let size = chunk.data.len();
                let chunk = chunk.with_metadata("record_count", size);
                if let Err(error) = buffer.add_chunk(chunk).await {
                    if error != StreamError::Closed {
                        buffer.fail(error);
                    }
                    return;
                }
            }
        });

        Ok(processor.process_stream())
    }

    /// Streams `results` record by record, each annotated with the chunk it
    /// travelled in. Records arrive in their original order.
    pub fn stream_results<T>(
        &self,
        results: Vec<T>,
        chunk_size: Option<usize>,
    ) -> Result<RecordStream<T>, ConfigurationError>
    where
        T: Send + 'static,
    {
        Ok(RecordStream {
            chunks: self.stream_chunks(results, chunk_size)?,
            pending: VecDeque::new(),
            position: 0,
        })
    }
}

/// Output of [`ResultStreamer::stream_results`].
pub struct RecordStream<T> {
    chunks: ProcessedStream<Vec<T>>,
    pending: VecDeque<StreamedRecord<T>>,
    position: usize,
}

// Fields are never pinned structurally
impl<T> Unpin for RecordStream<T> {}

impl<T> Stream for RecordStream<T> {
    type Item = StreamResult<StreamedRecord<T>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(record) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(record)));
            }

            let chunk = match Pin::new(&mut this.chunks).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => chunk,
                Poll::Ready(Some(Err(error))) => return Poll::Ready(Some(Err(error))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            };

            let processed_at = Utc::now();
            for record in chunk.data {
                this.pending.push_back(StreamedRecord {
                    record,
                    stream: StreamMetadata {
                        chunk_index: chunk.chunk_index,
                        total_chunks: chunk.total_chunks,
                        position: this.position,
                        processed_at,
                    },
                });
                this.position += 1;
            }
        }
    }
}
