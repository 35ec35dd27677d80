//! Bounded chunk queue between a producer task and the stream processor.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_util::sync::CancellationToken;

use super::chunk::StreamChunk;
use crate::error::{ConfigurationError, StreamError, StreamResult};

/// Bounded FIFO of [`StreamChunk`]s with a per-operation timeout.
///
/// Once closed, queued chunks can still be drained but nothing new is
/// accepted. Closing wakes every suspended producer and consumer.
#[derive(Debug)]
pub struct StreamBuffer<T> {
    sender: mpsc::Sender<StreamChunk<T>>,
    receiver: AsyncMutex<mpsc::Receiver<StreamChunk<T>>>,
    closed: CancellationToken,
    failure: Mutex<Option<StreamError>>,
    max_size: usize,
    chunk_timeout: Duration,
}

impl<T> StreamBuffer<T> {
    pub fn new(max_size: usize, chunk_timeout: Duration) -> Result<Self, ConfigurationError> {
        if max_size == 0 {
            return Err(ConfigurationError::invalid(
                "buffer_max_size",
                "must be at least 1",
            ));
        }
        if chunk_timeout.is_zero() {
            return Err(ConfigurationError::invalid(
                "chunk_timeout_seconds",
                "must be positive",
            ));
        }
        let (sender, receiver) = mpsc::channel(max_size);
        Ok(Self {
            sender,
            receiver: AsyncMutex::new(receiver),
            closed: CancellationToken::new(),
            failure: Mutex::new(None),
            max_size,
            chunk_timeout,
        })
    }

    /// Queues a chunk, waiting up to the chunk timeout for room.
    pub async fn add_chunk(&self, chunk: StreamChunk<T>) -> StreamResult<()> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(StreamError::Closed),
            sent = tokio::time::timeout(self.chunk_timeout, self.sender.send(chunk)) => match sent {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(StreamError::Closed),
                Err(_) => Err(StreamError::Timeout {
                    operation: "add_chunk",
                    timeout: self.chunk_timeout,
                }),
            },
        }
    }

    /// Takes the next chunk, waiting up to the chunk timeout.
    ///
    /// `None` means either nothing arrived in time or the buffer is closed
    /// and drained; [`is_drained`](Self::is_drained) tells them apart.
    pub async fn get_chunk(&self) -> Option<StreamChunk<T>> {
        let mut receiver = self.receiver.lock().await;
        if let Ok(chunk) = receiver.try_recv() {
            return Some(chunk);
        }
        if self.is_closed() {
            return None;
        }

        tokio::select! {
            biased;
            chunk = receiver.recv() => chunk,
            _ = self.closed.cancelled() => receiver.try_recv().ok(),
            _ = tokio::time::sleep(self.chunk_timeout) => None,
        }
    }

    /// Stops accepting chunks. Idempotent.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            tracing::debug!(queued = self.len(), "closing stream buffer");
            self.closed.cancel();
        }
    }

    /// Records `error` for the consumer and closes the buffer. The first
    /// recorded failure wins.
    pub fn fail(&self, error: StreamError) {
        {
            let mut failure = self.failure.lock();
            if failure.is_none() {
                tracing::warn!(%error, "stream failed");
                *failure = Some(error);
            }
        }
        self.close();
    }

    pub(crate) fn take_failure(&self) -> Option<StreamError> {
        self.failure.lock().take()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Closed with nothing left to read.
    pub fn is_drained(&self) -> bool {
        self.is_closed() && self.is_empty()
    }

    /// Chunks currently queued.
    pub fn len(&self) -> usize {
        self.max_size - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn chunk_timeout(&self) -> Duration {
        self.chunk_timeout
    }

    pub(crate) fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}
