//! Text to vector encoding.
//!
//! The retrieval core only needs `encode(texts) -> vectors`; embedding
//! models plug in behind [`Encoder`]. [`HashingEncoder`] is a deterministic
//! bag-of-words encoder used by the CLI and tests.

use sha2::{Digest, Sha256};

use crate::error::EncodeError;
use crate::vector::{VectorDimension, normalize_vector};

/// Produces one vector per input text.
pub trait Encoder: Send + Sync {
    /// Encodes a batch of texts. The output has the same length and order as
    /// `texts`, and every vector has [`dimension`](Self::dimension) entries.
    fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EncodeError>;

    #[must_use]
    fn dimension(&self) -> VectorDimension;
}

/// Feature-hashing encoder.
///
/// Each lowercase alphanumeric token is hashed to a signed bucket; the
/// bucket counts are L2-normalized. Texts that share words score higher
/// than texts that do not, which is enough to exercise the retrieval path
/// without a model.
#[derive(Debug, Clone, Copy)]
pub struct HashingEncoder {
    dimension: VectorDimension,
}

impl HashingEncoder {
    pub fn new(dimension: VectorDimension) -> Self {
        Self { dimension }
    }

    fn encode_one(&self, text: &str) -> Vec<f32> {
        let dim = self.dimension.get();
        let mut vector = vec![0.0; dim];
        for token in tokens(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let slot = (u64::from_le_bytes(bucket) % dim as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }
        normalize_vector(&mut vector);
        vector
    }
}

impl Encoder for HashingEncoder {
    fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EncodeError> {
        Ok(texts.iter().map(|text| self.encode_one(text)).collect())
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}
