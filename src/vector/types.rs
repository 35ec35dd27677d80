//! Core types shared by the shard backends and the sharded index.
//!
//! Vectors are plain `f32` slices. Everything stored or queried is
//! L2-normalized first, so the inner product used for ranking is the
//! cosine similarity.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, IndexError};

/// Identifier attached to a stored vector.
pub type VectorId = i64;

/// Epsilon below which a norm is treated as zero.
const EPSILON: f32 = 1e-10;

/// Type-safe wrapper for vector dimensions.
///
/// Ensures runtime validation of vector dimensions to prevent dimension
/// mismatches during operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> Result<Self, ConfigurationError> {
        if dim == 0 {
            return Err(ConfigurationError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    /// Returns the underlying dimension value.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.0 {
            return Err(IndexError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

impl TryFrom<usize> for VectorDimension {
    type Error = ConfigurationError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VectorDimension> for usize {
    fn from(value: VectorDimension) -> Self {
        value.0
    }
}

/// One search hit: stored id and its similarity to the query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: VectorId,
    pub score: f32,
}

/// Results of a batched search, one row per query, best hit first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    pub rows: Vec<Vec<Neighbor>>,
}

impl SearchResults {
    /// Similarity scores per query row.
    #[must_use]
    pub fn scores(&self) -> Vec<Vec<f32>> {
        self.rows
            .iter()
            .map(|row| row.iter().map(|n| n.score).collect())
            .collect()
    }

    /// Ids per query row.
    #[must_use]
    pub fn ids(&self) -> Vec<Vec<VectorId>> {
        self.rows
            .iter()
            .map(|row| row.iter().map(|n| n.id).collect())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Inner product of two equal-length vectors.
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Normalizes a vector in-place to unit length.
///
/// Vectors with a (near) zero norm are left as they are.
pub fn normalize_vector(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Creates a normalized copy of a vector.
pub fn normalize_vector_copy(vector: &[f32]) -> Vec<f32> {
    let mut normalized = vector.to_vec();
    normalize_vector(&mut normalized);
    normalized
}

/// Orders hits best first. `sort_by` is stable, so equal scores keep their
/// incoming order.
pub(crate) fn sort_best_first(hits: &mut [Neighbor]) {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
}
