//! Drains a [`StreamBuffer`] into a lazy stream of transformed chunks.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::buffer::StreamBuffer;
use super::chunk::StreamChunk;
use crate::error::{ConfigurationError, StreamError, StreamResult};

/// Per-batch transform applied by [`StreamProcessor`].
pub type ChunkTransform<T, U> =
    Arc<dyn Fn(Vec<StreamChunk<T>>) -> Vec<StreamChunk<U>> + Send + Sync>;

pub struct StreamProcessor<T, U> {
    buffer: Arc<StreamBuffer<T>>,
    transform: ChunkTransform<T, U>,
    batch_size: Option<usize>,
}

impl<T> StreamProcessor<T, T>
where
    T: Send + 'static,
{
    /// A processor that forwards chunks unchanged.
    pub fn passthrough(buffer: Arc<StreamBuffer<T>>) -> Self {
        Self::new(buffer, Arc::new(|batch: Vec<StreamChunk<T>>| batch))
    }
}

impl<T, U> StreamProcessor<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    pub fn new(buffer: Arc<StreamBuffer<T>>, transform: ChunkTransform<T, U>) -> Self {
        Self {
            buffer,
            transform,
            batch_size: None,
        }
    }

    /// Groups chunks into batches of `batch_size` before transforming.
    /// `None` transforms one chunk at a time.
    pub fn with_batch_size(
        mut self,
        batch_size: Option<usize>,
    ) -> Result<Self, ConfigurationError> {
        if batch_size == Some(0) {
            return Err(ConfigurationError::invalid("batch_size", "must be at least 1"));
        }
        self.batch_size = batch_size;
        Ok(self)
    }

    /// Starts draining the buffer on a background task.
    ///
    /// The returned stream ends after the terminal chunk, or once the buffer
    /// is closed and empty; a failure recorded on the buffer is yielded as
    /// the final item. Partial batches are always flushed. Dropping the
    /// stream closes the buffer.
    pub fn process_stream(self) -> ProcessedStream<U> {
        let Self {
            buffer,
            transform,
            batch_size,
        } = self;
        let batch_size = batch_size.unwrap_or(1);
        let (tx, rx) = mpsc::channel(buffer.max_size());
        let close = buffer.close_token();

        tokio::spawn(async move {
            let mut batch = Vec::with_capacity(batch_size);
            loop {
                match buffer.get_chunk().await {
                    Some(chunk) => {
                        let is_last = chunk.is_last;
                        batch.push(chunk);
                        if (is_last || batch.len() >= batch_size)
                            && !flush(&mut batch, transform.as_ref(), &tx).await
                        {
                            break;
                        }
                        if is_last {
                            break;
                        }
                    }
                    None if buffer.is_drained() => {
                        if flush(&mut batch, transform.as_ref(), &tx).await
                            && let Some(error) = buffer.take_failure()
                        {
                            let _ = tx.send(Err(error)).await;
                        }
                        break;
                    }
                    // Timed out on an open buffer: nothing ready yet
                    None => {}
                }
            }
            buffer.close();
        });

        ProcessedStream {
            inner: ReceiverStream::new(rx),
            close,
        }
    }
}

/// Sends the transformed batch. False when the consumer is gone.
async fn flush<T, U>(
    batch: &mut Vec<StreamChunk<T>>,
    transform: &(dyn Fn(Vec<StreamChunk<T>>) -> Vec<StreamChunk<U>> + Send + Sync),
    tx: &mpsc::Sender<StreamResult<StreamChunk<U>>>,
) -> bool {
    if batch.is_empty() {
        return true;
    }
    for chunk in transform(std::mem::take(batch)) {
        if tx.send(Ok(chunk)).await.is_err() {
            return false;
        }
    }
    true
}

/// Output of [`StreamProcessor::process_stream`].
pub struct ProcessedStream<U> {
    inner: ReceiverStream<StreamResult<StreamChunk<U>>>,
    close: CancellationToken,
}

impl<U> Stream for ProcessedStream<U> {
    type Item = Result<StreamChunk<U>, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<U> Drop for ProcessedStream<U> {
    fn drop(&mut self) {
        self.close.cancel();
    }
}
