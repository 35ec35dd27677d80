//! Shard backends.
//!
//! A shard is an independent sub-index holding a disjoint slice of the
//! corpus. Two kinds exist:
//! - [`FlatShard`]: exhaustive linear scan, exact results, no training.
//! - [`IvfShard`]: inverted-file shard. Vectors are clustered around `nlist`
//!   centroids once [`ShardBackend::train`] has run, and queries only scan
//!   the `nprobe` closest lists. Until trained it answers by exact scan.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::vector::clustering::{
    ClusteringError, kmeans_clustering, nearest_centroid, nearest_centroids,
};
use crate::vector::types::{Neighbor, VectorId, inner_product, sort_best_first};

/// The kind of backend every shard of an index uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShardKind {
    #[default]
    #[serde(alias = "flat")]
    Exhaustive,
    #[serde(alias = "ivf")]
    Partitioned,
}

impl ShardKind {
    /// Stable numeric tag used in shard files.
    pub(crate) fn tag(self) -> u32 {
        match self {
            Self::Exhaustive => 0,
            Self::Partitioned => 1,
        }
    }

    pub(crate) fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::Exhaustive),
            1 => Some(Self::Partitioned),
            _ => None,
        }
    }
}

impl FromStr for ShardKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exhaustive" | "flat" => Ok(Self::Exhaustive),
            "partitioned" | "ivf" => Ok(Self::Partitioned),
            _ => Err(ConfigurationError::UnknownShardKind {
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ShardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhaustive => f.write_str("exhaustive"),
            Self::Partitioned => f.write_str("partitioned"),
        }
    }
}

/// Capability interface shared by all shard kinds.
///
/// Vectors handed to a backend are already validated and normalized.
pub trait ShardBackend {
    /// Appends vectors paired with their ids, preserving order.
    fn add(&mut self, vectors: &[Vec<f32>], ids: &[VectorId]);

    /// Top-`k` hits for one query, best first. `nprobe` is ignored by
    /// backends without inverted lists.
    fn search(&self, query: &[f32], k: usize, nprobe: usize) -> Vec<Neighbor>;

    /// Number of stored vectors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this backend needs a training pass before approximate search.
    fn requires_training(&self) -> bool {
        false
    }

    fn is_trained(&self) -> bool {
        !self.requires_training()
    }

    /// Trains the backend on a sample of its own vectors.
    fn train(&mut self, _sample: &[Vec<f32>]) -> Result<(), ClusteringError> {
        Ok(())
    }
}

/// Exhaustive shard: contiguous row-major vector storage plus ids.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatShard {
    dimension: usize,
    vectors: Vec<f32>,
    ids: Vec<VectorId>,
}

impl FlatShard {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
            ids: Vec::new(),
        }
    }

    /// Rebuilds a shard from persisted parts. `vectors.len()` must equal
    /// `ids.len() * dimension`.
    pub(crate) fn from_parts(dimension: usize, ids: Vec<VectorId>, vectors: Vec<f32>) -> Self {
        debug_assert_eq!(vectors.len(), ids.len() * dimension);
        Self {
            dimension,
            vectors,
            ids,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn ids(&self) -> &[VectorId] {
        &self.ids
    }

    /// Row-major vector data.
    pub fn raw_vectors(&self) -> &[f32] {
        &self.vectors
    }

    /// Stored vector at insertion position `pos`.
    pub fn reconstruct(&self, pos: usize) -> &[f32] {
        let start = pos * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    fn hit(&self, query: &[f32], pos: usize) -> Neighbor {
        Neighbor {
            id: self.ids[pos],
            score: inner_product(query, self.reconstruct(pos)),
        }
    }
}

impl ShardBackend for FlatShard {
    fn add(&mut self, vectors: &[Vec<f32>], ids: &[VectorId]) {
        self.vectors.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.vectors.extend_from_slice(vector);
        }
        self.ids.extend_from_slice(ids);
    }

    fn search(&self, query: &[f32], k: usize, _nprobe: usize) -> Vec<Neighbor> {
        if k == 0 {
            return Vec::new();
        }
        let mut hits: Vec<Neighbor> = (0..self.ids.len())
            .map(|pos| self.hit(query, pos))
            .collect();
        sort_best_first(&mut hits);
        hits.truncate(k);
        hits
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Inverted-file shard.
///
/// All vectors live in an inner [`FlatShard`] in insertion order, so the
/// shard can always reconstruct its own training sample. Training adds the
/// coarse centroids and one inverted list (insertion positions) per centroid.
#[derive(Debug, Clone, PartialEq)]
pub struct IvfShard {
    store: FlatShard,
    nlist: usize,
    centroids: Vec<Vec<f32>>,
    /// Inverted-list index for each stored vector, empty until trained.
    assignments: Vec<u32>,
    lists: Vec<Vec<usize>>,
}

impl IvfShard {
    pub fn new(dimension: usize, nlist: usize) -> Self {
        Self {
            store: FlatShard::new(dimension),
            nlist,
            centroids: Vec::new(),
            assignments: Vec::new(),
            lists: Vec::new(),
        }
    }

    /// Rebuilds a shard from persisted parts. An empty `centroids` means the
    /// shard was saved untrained and `assignments` is ignored.
    pub(crate) fn from_parts(
        store: FlatShard,
        nlist: usize,
        centroids: Vec<Vec<f32>>,
        assignments: Vec<u32>,
    ) -> Self {
        let mut shard = Self {
            store,
            nlist,
            centroids,
            assignments: Vec::new(),
            lists: Vec::new(),
        };
        if shard.is_trained() {
            shard.lists = vec![Vec::new(); shard.centroids.len()];
            for (pos, list) in assignments.into_iter().enumerate() {
                shard.lists[list as usize].push(pos);
                shard.assignments.push(list);
            }
        }
        shard
    }

    pub fn store(&self) -> &FlatShard {
        &self.store
    }

    pub fn nlist(&self) -> usize {
        self.nlist
    }

    pub fn centroids(&self) -> &[Vec<f32>] {
        &self.centroids
    }

    pub fn assignments(&self) -> &[u32] {
        &self.assignments
    }

    /// Copies out the vectors at the given insertion positions.
    pub fn sample(&self, positions: &[usize]) -> Vec<Vec<f32>> {
        positions
            .iter()
            .map(|&pos| self.store.reconstruct(pos).to_vec())
            .collect()
    }

    fn assign(&mut self, from: usize) {
        for pos in from..self.store.len() {
            let list = nearest_centroid(self.store.reconstruct(pos), &self.centroids);
            self.lists[list].push(pos);
            self.assignments.push(list as u32);
        }
    }
}

impl ShardBackend for IvfShard {
    fn add(&mut self, vectors: &[Vec<f32>], ids: &[VectorId]) {
        let from = self.store.len();
        self.store.add(vectors, ids);
        if self.is_trained() {
            self.assign(from);
        }
    }

    fn search(&self, query: &[f32], k: usize, nprobe: usize) -> Vec<Neighbor> {
        if !self.is_trained() {
            return self.store.search(query, k, nprobe);
        }
        if k == 0 {
            return Vec::new();
        }

        let probes = nearest_centroids(query, &self.centroids, nprobe.max(1));
        let mut hits: Vec<Neighbor> = probes
            .iter()
            .flat_map(|&list| self.lists[list].iter())
            .map(|&pos| self.store.hit(query, pos))
            .collect();
        sort_best_first(&mut hits);
        hits.truncate(k);
        hits
    }

    fn len(&self) -> usize {
        self.store.len()
    }

    fn requires_training(&self) -> bool {
        true
    }

    fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    /// Trains on `sample` unless already trained; a trained shard is never
    /// retrained.
    fn train(&mut self, sample: &[Vec<f32>]) -> Result<(), ClusteringError> {
        if self.is_trained() {
            return Ok(());
        }
        let k = self.nlist.min(sample.len());
        let result = kmeans_clustering(sample, k)?;
        self.centroids = result.centroids;
        self.lists = vec![Vec::new(); self.centroids.len()];
        self.assignments.clear();
        self.assign(0);
        Ok(())
    }
}

/// A shard of either kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Shard {
    Exhaustive(FlatShard),
    Partitioned(IvfShard),
}

impl Shard {
    pub fn new(kind: ShardKind, dimension: usize, nlist: usize) -> Self {
        match kind {
            ShardKind::Exhaustive => Self::Exhaustive(FlatShard::new(dimension)),
            ShardKind::Partitioned => Self::Partitioned(IvfShard::new(dimension, nlist)),
        }
    }

    pub fn kind(&self) -> ShardKind {
        match self {
            Self::Exhaustive(_) => ShardKind::Exhaustive,
            Self::Partitioned(_) => ShardKind::Partitioned,
        }
    }

    fn backend(&self) -> &dyn ShardBackend {
        match self {
            Self::Exhaustive(s) => s,
            Self::Partitioned(s) => s,
        }
    }

    fn backend_mut(&mut self) -> &mut dyn ShardBackend {
        match self {
            Self::Exhaustive(s) => s,
            Self::Partitioned(s) => s,
        }
    }
}

impl ShardBackend for Shard {
    fn add(&mut self, vectors: &[Vec<f32>], ids: &[VectorId]) {
        self.backend_mut().add(vectors, ids);
    }

    fn search(&self, query: &[f32], k: usize, nprobe: usize) -> Vec<Neighbor> {
        self.backend().search(query, k, nprobe)
    }

    fn len(&self) -> usize {
        self.backend().len()
    }

    fn requires_training(&self) -> bool {
        self.backend().requires_training()
    }

    fn is_trained(&self) -> bool {
        self.backend().is_trained()
    }

    fn train(&mut self, sample: &[Vec<f32>]) -> Result<(), ClusteringError> {
        self.backend_mut().train(sample)
    }
}
