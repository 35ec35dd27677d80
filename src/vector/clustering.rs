//! K-means clustering used to train the coarse quantizer of partitioned shards.
//!
//! Inputs are unit-length vectors, so similarity is the plain inner product
//! and centroids are re-normalized after every update.
//!
//! # Algorithm Details
//! - Similarity: inner product on normalized vectors (cosine)
//! - Initialization: K-means++ for better convergence
//! - Max iterations: 100
//! - Convergence tolerance: 1e-4

use rand::Rng;
use thiserror::Error;

use crate::vector::types::{inner_product, normalize_vector, normalize_vector_copy};

/// Maximum number of iterations for K-means clustering.
const MAX_ITERATIONS: usize = 100;

/// Convergence tolerance for centroid updates.
const CONVERGENCE_TOLERANCE: f32 = 1e-4;

/// Epsilon for floating-point comparisons.
const EPSILON: f32 = 1e-10;

/// Result of K-means clustering operation.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Cluster centroids, each a unit vector of the input dimension.
    pub centroids: Vec<Vec<f32>>,

    /// Zero-based cluster assignment for each input vector.
    pub assignments: Vec<usize>,

    /// Number of iterations until convergence.
    pub iterations: usize,
}

/// Errors that can occur during clustering operations.
#[derive(Error, Debug)]
pub enum ClusteringError {
    #[error("Empty vector set provided for clustering")]
    EmptyVectorSet,

    #[error("Invalid cluster count: {0}\nSuggestion: Use k between 1 and the number of vectors")]
    InvalidClusterCount(usize),

    #[error("Dimension mismatch in vectors")]
    DimensionMismatch,

    #[error(
        "Failed to initialize centroids\nSuggestion: Check that vectors contain valid floating-point values"
    )]
    InitializationFailed,
}

/// Performs K-means clustering on a set of unit vectors.
///
/// # Algorithm
/// 1. Initialize centroids using K-means++ method
/// 2. Iterate until convergence or max iterations:
///    - Assign each vector to nearest centroid
///    - Update centroids as normalized mean of assigned vectors
///    - Check convergence based on centroid movement
#[must_use = "clustering results should be used or the computation is wasted"]
pub fn kmeans_clustering(vectors: &[Vec<f32>], k: usize) -> Result<KMeansResult, ClusteringError> {
    if vectors.is_empty() {
        return Err(ClusteringError::EmptyVectorSet);
    }

    if k == 0 || k > vectors.len() {
        return Err(ClusteringError::InvalidClusterCount(k));
    }

    let dimension = vectors[0].len();
    if vectors.iter().any(|v| v.len() != dimension) {
        return Err(ClusteringError::DimensionMismatch);
    }

    let mut centroids = initialize_centroids_kmeans_plus_plus(vectors, k)?;
    let mut assignments = vec![usize::MAX; vectors.len()];
    let mut iterations = 0;

    loop {
        iterations += 1;

        let new_assignments: Vec<usize> = vectors
            .iter()
            .map(|vector| nearest_centroid(vector, &centroids))
            .collect();

        let converged = new_assignments == assignments;
        assignments = new_assignments;

        if converged || iterations >= MAX_ITERATIONS {
            break;
        }

        let new_centroids = update_centroids(vectors, &assignments, k);
        let centroid_movement = calculate_centroid_movement(&centroids, &new_centroids);
        centroids = new_centroids;

        if centroid_movement < CONVERGENCE_TOLERANCE {
            // Centroids moved; refresh assignments so they match the final centroids.
            assignments = vectors
                .iter()
                .map(|vector| nearest_centroid(vector, &centroids))
                .collect();
            break;
        }
    }

    if iterations >= MAX_ITERATIONS {
        tracing::warn!("K-means did not fully converge after {MAX_ITERATIONS} iterations");
    }

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
    })
}

/// Index of the centroid with the highest inner product with `vector`.
///
/// Ties resolve to the lowest index.
pub fn nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best_similarity = f32::NEG_INFINITY;
    let mut best_cluster = 0;

    for (i, centroid) in centroids.iter().enumerate() {
        let similarity = inner_product(vector, centroid);
        if similarity > best_similarity {
            best_similarity = similarity;
            best_cluster = i;
        }
    }

    best_cluster
}

/// Indices of the `n` centroids most similar to `vector`, best first.
pub fn nearest_centroids(vector: &[f32], centroids: &[Vec<f32>], n: usize) -> Vec<usize> {
    let mut scored: Vec<(usize, f32)> = centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, inner_product(vector, c)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.into_iter().take(n).map(|(i, _)| i).collect()
}

/// Updates centroids as the normalized mean of their assigned vectors.
fn update_centroids(vectors: &[Vec<f32>], assignments: &[usize], k: usize) -> Vec<Vec<f32>> {
    let dimension = vectors[0].len();
    let mut new_centroids = vec![vec![0.0; dimension]; k];
    let mut cluster_sizes = vec![0usize; k];

    for (vector, &cluster_idx) in vectors.iter().zip(assignments.iter()) {
        for (i, &value) in vector.iter().enumerate() {
            new_centroids[cluster_idx][i] += value;
        }
        cluster_sizes[cluster_idx] += 1;
    }

    let mut rng = rand::rng();
    for (centroid, &size) in new_centroids.iter_mut().zip(cluster_sizes.iter()) {
        if size == 0 {
            // Empty cluster: reseed from a random input vector
            let random_idx = rng.random_range(0..vectors.len());
            *centroid = normalize_vector_copy(&vectors[random_idx]);
        } else {
            for value in centroid.iter_mut() {
                *value /= size as f32;
            }
            normalize_vector(centroid);
        }
    }

    new_centroids
}

/// Initializes centroids using the K-means++ algorithm.
///
/// Coincident points are allowed to seed several centroids, so exactly `k`
/// centroids come back whenever `k <= vectors.len()`.
fn initialize_centroids_kmeans_plus_plus(
    vectors: &[Vec<f32>],
    k: usize,
) -> Result<Vec<Vec<f32>>, ClusteringError> {
    let mut rng = rand::rng();
    let mut centroids = Vec::with_capacity(k);
    let mut chosen = vec![false; vectors.len()];

    let first_idx = rng.random_range(0..vectors.len());
    chosen[first_idx] = true;
    centroids.push(normalize_vector_copy(&vectors[first_idx]));

    while centroids.len() < k {
        let mut distances = vec![0.0f32; vectors.len()];
        let mut total_distance = 0.0f32;

        for (i, vector) in vectors.iter().enumerate() {
            if chosen[i] {
                continue;
            }
            let min_distance = centroids
                .iter()
                .map(|centroid| 1.0 - inner_product(vector, centroid))
                .fold(f32::MAX, f32::min)
                .max(0.0);
            distances[i] = min_distance * min_distance;
            total_distance += distances[i];
        }

        let next = if total_distance < EPSILON {
            // Every remaining point coincides with a centroid: take the first unused one
            chosen.iter().position(|used| !used)
        } else {
            let target = rng.random::<f32>() * total_distance;
            let mut cumulative = 0.0;
            let mut picked = None;
            for (i, &distance) in distances.iter().enumerate() {
                if chosen[i] {
                    continue;
                }
                cumulative += distance;
                if cumulative >= target {
                    picked = Some(i);
                    break;
                }
            }
            // Rounding can leave the target just past the last bucket
            picked.or_else(|| chosen.iter().rposition(|used| !used))
        };

        let idx = next.ok_or(ClusteringError::InitializationFailed)?;
        chosen[idx] = true;
        centroids.push(normalize_vector_copy(&vectors[idx]));
    }

    Ok(centroids)
}

/// Calculates the mean movement of centroids between iterations.
fn calculate_centroid_movement(old: &[Vec<f32>], new: &[Vec<f32>]) -> f32 {
    old.iter()
        .zip(new.iter())
        .map(|(old_c, new_c)| 1.0 - inner_product(old_c, new_c))
        .sum::<f32>()
        / old.len() as f32
}
