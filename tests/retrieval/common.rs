use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Deterministic batch of vectors with entries in [-1, 1).
pub fn random_vectors(count: usize, dimension: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            (0..dimension)
                .map(|_| rng.random_range(-1.0f32..1.0))
                .collect()
        })
        .collect()
}

/// Exact top-k by cosine similarity, ids being positions in `vectors`.
pub fn brute_force(vectors: &[Vec<f32>], query: &[f32], k: usize) -> Vec<(i64, f32)> {
    let query = docqa_retrieval::vector::normalize_vector_copy(query);
    let mut scored: Vec<(i64, f32)> = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let v = docqa_retrieval::vector::normalize_vector_copy(v);
            (i as i64, docqa_retrieval::vector::inner_product(&query, &v))
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(k);
    scored
}
