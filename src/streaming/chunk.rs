use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One piece of a stream.
///
/// A well-formed stream has exactly one chunk with `is_last` set and it is
/// the final chunk delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk<T> {
    pub data: T,

    #[serde(default)]
    pub metadata: HashMap<String, Value>,

    /// Zero-based position of this chunk in its stream.
    pub chunk_index: usize,

    /// Number of chunks in the stream, when known up front.
    pub total_chunks: Option<usize>,

    pub is_last: bool,
}

impl<T> StreamChunk<T> {
    pub fn new(data: T, chunk_index: usize) -> Self {
        Self {
            data,
            metadata: HashMap::new(),
            chunk_index,
            total_chunks: None,
            is_last: false,
        }
    }

    pub fn with_total(mut self, total_chunks: usize) -> Self {
        self.total_chunks = Some(total_chunks);
        self
    }

    pub fn last(mut self) -> Self {
        self.is_last = true;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Replaces the payload, keeping index, total, flag and metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StreamChunk<U> {
        StreamChunk {
            data: f(self.data),
            metadata: self.metadata,
            chunk_index: self.chunk_index,
            total_chunks: self.total_chunks,
            is_last: self.is_last,
        }
    }
}

/// Splits `records` into chunks of at most `chunk_size` records, tagged with
/// their index and the total count. The final chunk is flagged `is_last`.
///
/// An empty input produces a single empty terminal chunk. `chunk_size` must
/// be non-zero.
pub fn chunk_records<T>(records: Vec<T>, chunk_size: usize) -> Vec<StreamChunk<Vec<T>>> {
    debug_assert!(chunk_size > 0);
    let mut pieces: Vec<Vec<T>> = Vec::with_capacity(records.len().div_ceil(chunk_size));
    let mut current = Vec::with_capacity(chunk_size.min(records.len()));
    for record in records {
        current.push(record);
        if current.len() == chunk_size {
            pieces.push(std::mem::replace(&mut current, Vec::with_capacity(chunk_size)));
        }
    }
    if !current.is_empty() || pieces.is_empty() {
        pieces.push(current);
    }

    let total = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(index, data)| {
            let chunk = StreamChunk::new(data, index).with_total(total);
            if index + 1 == total { chunk.last() } else { chunk }
        })
        .collect()
}
