//! Sharded vector index.
//!
//! The index owns `num_shards` independent shards of one [`ShardKind`].
//! Batches added to it are split into contiguous ranges, one per shard, and
//! searches fan out to every shard before a global top-k merge.

use std::fs;
use std::path::Path;

use rand::seq::index::sample as sample_positions;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, IndexError, IndexResult};
use crate::vector::placement::Placement;
use crate::vector::shard::{Shard, ShardBackend, ShardKind};
use crate::vector::storage::{read_shard, shard_path, write_shard};
use crate::vector::types::{
    Neighbor, SearchResults, VectorDimension, VectorId, normalize_vector_copy, sort_best_first,
};

/// Upper bound on the number of vectors used to train one shard.
pub const MAX_TRAINING_SAMPLE: usize = 100_000;

/// File name of the configuration record inside a saved index directory.
pub const CONFIG_FILE: &str = "index_config.json";

/// Current configuration record version.
const CONFIG_VERSION: u32 = 1;

/// Constructor parameters of a [`ShardedIndex`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub dimension: usize,
    pub num_shards: usize,
    pub shard_kind: ShardKind,
    /// Number of inverted lists per partitioned shard.
    pub nlist: usize,
    /// Number of lists scanned per query on partitioned shards.
    pub nprobe: usize,
    #[serde(default)]
    pub use_accelerator: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            num_shards: 4,
            shard_kind: ShardKind::Exhaustive,
            nlist: 100,
            nprobe: 10,
            use_accelerator: false,
        }
    }
}

impl IndexConfig {
    pub fn new(dimension: usize, num_shards: usize, shard_kind: ShardKind) -> Self {
        Self {
            dimension,
            num_shards,
            shard_kind,
            ..Self::default()
        }
    }

    /// Checks every parameter is usable.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        VectorDimension::new(self.dimension)?;
        if self.num_shards == 0 {
            return Err(ConfigurationError::invalid(
                "num_shards",
                "an index needs at least one shard",
            ));
        }
        if self.nlist == 0 {
            return Err(ConfigurationError::invalid("nlist", "must be at least 1"));
        }
        if self.nprobe == 0 {
            return Err(ConfigurationError::invalid("nprobe", "must be at least 1"));
        }
        Ok(())
    }
}

/// Persisted form of [`IndexConfig`].
#[derive(Debug, Serialize, Deserialize)]
struct ConfigRecord {
    version: u32,
    #[serde(flatten)]
    config: IndexConfig,
}

/// In-memory sharded index.
///
/// Mutating operations (`add`, `optimize`, `set_nprobe`) take `&mut self`;
/// sharing one index between concurrent writers and readers needs an
/// external lock.
#[derive(Debug)]
pub struct ShardedIndex {
    config: IndexConfig,
    dimension: VectorDimension,
    placement: Placement,
    shards: Vec<Shard>,
}

impl ShardedIndex {
    /// Creates an empty index with `config.num_shards` shards.
    pub fn create(config: IndexConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let dimension = VectorDimension::new(config.dimension)?;
        let placement = Placement::resolve(config.use_accelerator);
        let shards = (0..config.num_shards)
            .map(|_| Shard::new(config.shard_kind, config.dimension, config.nlist))
            .collect();

        tracing::debug!(
            "Created {} index: dimension={}, shards={}, placement={:?}",
            config.shard_kind,
            config.dimension,
            config.num_shards,
            placement
        );

        Ok(Self {
            config,
            dimension,
            placement,
            shards,
        })
    }

    /// Adds a batch of vectors, optionally with one id per vector.
    ///
    /// Vectors are normalized, then the batch is cut into `num_shards`
    /// contiguous ranges of `n / num_shards` vectors; the last shard takes
    /// the remainder. Without ids, vectors are numbered globally in
    /// insertion order starting at [`len`](Self::len).
    pub fn add(&mut self, vectors: &[Vec<f32>], ids: Option<&[VectorId]>) -> IndexResult<()> {
        for vector in vectors {
            self.dimension.validate_vector(vector)?;
        }
        if let Some(ids) = ids
            && ids.len() != vectors.len()
        {
            return Err(IndexError::IdCountMismatch {
                vectors: vectors.len(),
                ids: ids.len(),
            });
        }
        if vectors.is_empty() {
            return Ok(());
        }

        let normalized: Vec<Vec<f32>> = vectors.iter().map(|v| normalize_vector_copy(v)).collect();
        let ids: Vec<VectorId> = match ids {
            Some(ids) => ids.to_vec(),
            None => {
                let start = self.len() as VectorId;
                (start..start + vectors.len() as VectorId).collect()
            }
        };

        for (ordinal, range) in shard_ranges(normalized.len(), self.shards.len())
            .into_iter()
            .enumerate()
        {
            if range.is_empty() {
                continue;
            }
            self.shards[ordinal].add(&normalized[range.clone()], &ids[range]);
        }

        tracing::debug!("Added {} vectors, total {}", vectors.len(), self.len());
        Ok(())
    }

    /// Top-`k` neighbors for every query row, best first.
    ///
    /// Each shard returns its own top-`k`; the per-row merge concatenates
    /// shard results in shard order and stable-sorts them, so ties resolve
    /// by shard order and repeated queries give identical answers.
    pub fn search(&self, queries: &[Vec<f32>], k: usize) -> IndexResult<SearchResults> {
        for query in queries {
            self.dimension.validate_vector(query)?;
        }
        let queries: Vec<Vec<f32>> = queries.iter().map(|q| normalize_vector_copy(q)).collect();
        let nprobe = self.config.nprobe;

        let per_shard: Vec<Vec<Vec<Neighbor>>> = self
            .shards
            .par_iter()
            .map(|shard| {
                queries
                    .iter()
                    .map(|query| shard.search(query, k, nprobe))
                    .collect()
            })
            .collect();

        let rows = (0..queries.len())
            .map(|row| {
                let mut merged: Vec<Neighbor> = per_shard
                    .iter()
                    .flat_map(|shard_rows| shard_rows[row].iter().copied())
                    .collect();
                sort_best_first(&mut merged);
                merged.truncate(k);
                merged
            })
            .collect();

        Ok(SearchResults { rows })
    }

    /// Trains every untrained partitioned shard on a random sample of its
    /// own vectors (at most [`MAX_TRAINING_SAMPLE`]). Idempotent.
    pub fn optimize(&mut self) -> IndexResult<()> {
        let mut rng = rand::rng();
        for (ordinal, shard) in self.shards.iter_mut().enumerate() {
            if !shard.requires_training() || shard.is_trained() {
                continue;
            }
            let Shard::Partitioned(ivf) = &*shard else {
                continue;
            };
            let count = ivf.len();
            if count == 0 {
                tracing::debug!("Skipping training of empty shard {ordinal}");
                continue;
            }

            let mut positions = if count > MAX_TRAINING_SAMPLE {
                sample_positions(&mut rng, count, MAX_TRAINING_SAMPLE).into_vec()
            } else {
                (0..count).collect()
            };
            positions.sort_unstable();
            let sample = ivf.sample(&positions);

            shard.train(&sample).map_err(|e| IndexError::Backend {
                shard: ordinal,
                reason: format!("training failed: {e}"),
            })?;
            tracing::info!(
                "Trained shard {ordinal} on {} of {count} vectors",
                sample.len()
            );
        }
        Ok(())
    }

    /// Writes the configuration record and one file per shard into `dir`.
    pub fn save(&self, dir: impl AsRef<Path>) -> IndexResult<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| IndexError::io(dir, e))?;

        let config_path = dir.join(CONFIG_FILE);
        let record = ConfigRecord {
            version: CONFIG_VERSION,
            config: self.config.clone(),
        };
        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| IndexError::corrupted(&config_path, e.to_string()))?;
        fs::write(&config_path, json).map_err(|e| IndexError::io(&config_path, e))?;

        for (ordinal, shard) in self.shards.iter().enumerate() {
            write_shard(&shard_path(dir, ordinal), shard)?;
        }

        tracing::info!(
            "Saved index with {} vectors in {} shards to {}",
            self.len(),
            self.shards.len(),
            dir.display()
        );
        Ok(())
    }

    /// Rebuilds an index from a directory written by [`save`](Self::save).
    pub fn load(dir: impl AsRef<Path>) -> IndexResult<Self> {
        let dir = dir.as_ref();
        let config_path = dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(IndexError::MissingConfig { path: config_path });
        }

        let json = fs::read_to_string(&config_path).map_err(|e| IndexError::io(&config_path, e))?;
        let record: ConfigRecord = serde_json::from_str(&json)
            .map_err(|e| IndexError::corrupted(&config_path, format!("invalid config: {e}")))?;
        if record.version > CONFIG_VERSION {
            return Err(IndexError::corrupted(
                &config_path,
                format!(
                    "config version {} is newer than supported version {CONFIG_VERSION}",
                    record.version
                ),
            ));
        }

        let mut index = Self::create(record.config)?;
        for ordinal in 0..index.shards.len() {
            index.shards[ordinal] = read_shard(
                &shard_path(dir, ordinal),
                ordinal,
                index.config.shard_kind,
                index.config.dimension,
                index.config.nlist,
            )?;
        }

        tracing::info!(
            "Loaded index with {} vectors in {} shards from {}",
            index.len(),
            index.shards.len(),
            dir.display()
        );
        Ok(index)
    }

    /// Changes the number of inverted lists scanned per query.
    pub fn set_nprobe(&mut self, nprobe: usize) -> Result<(), ConfigurationError> {
        if nprobe == 0 {
            return Err(ConfigurationError::invalid("nprobe", "must be at least 1"));
        }
        self.config.nprobe = nprobe;
        Ok(())
    }

    /// Total number of stored vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    #[must_use]
    pub fn placement(&self) -> Placement {
        self.placement
    }

    #[must_use]
    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    #[must_use]
    pub fn shard_sizes(&self) -> Vec<usize> {
        self.shards.iter().map(|s| s.len()).collect()
    }
}

/// Contiguous ranges splitting `n` items over `shards` shards: each range
/// holds `n / shards` items and the last one absorbs the remainder.
fn shard_ranges(n: usize, shards: usize) -> Vec<std::ops::Range<usize>> {
    let per_shard = n / shards;
    (0..shards)
        .map(|i| {
            let start = i * per_shard;
            let end = if i + 1 == shards { n } else { start + per_shard };
            start..end
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn axis(dim: usize, i: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[i] = 1.0;
        v
    }

    #[test]
    fn test_shard_ranges() {
        assert_eq!(shard_ranges(10, 3), vec![0..3, 3..6, 6..10]);
        assert_eq!(shard_ranges(2, 4), vec![0..0, 0..0, 0..0, 0..2]);
        assert_eq!(shard_ranges(0, 2), vec![0..0, 0..0]);
    }

    #[test]
    fn test_create_validates_config() {
        assert!(ShardedIndex::create(IndexConfig::new(0, 2, ShardKind::Exhaustive)).is_err());
        assert!(ShardedIndex::create(IndexConfig::new(4, 0, ShardKind::Exhaustive)).is_err());

        let index = ShardedIndex::create(IndexConfig::new(4, 2, ShardKind::Exhaustive)).unwrap();
        assert_eq!(index.shards().len(), 2);
        assert!(index.is_empty());
    }

    #[test]
    fn test_axis_vectors_scenario() {
        let mut index =
            ShardedIndex::create(IndexConfig::new(4, 2, ShardKind::Exhaustive)).unwrap();
        let vectors: Vec<Vec<f32>> = (0..4).map(|i| axis(4, i)).collect();
        index.add(&vectors, Some(&[0, 1, 2, 3])).unwrap();
        assert_eq!(index.shard_sizes(), vec![2, 2]);

        let results = index.search(&[vec![1.0, 0.0, 0.0, 0.0]], 1).unwrap();
        assert_eq!(results.ids(), vec![vec![0]]);
        assert!((results.scores()[0][0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_add_keeps_contiguous_order_and_assigns_ids() {
        let mut index =
            ShardedIndex::create(IndexConfig::new(3, 2, ShardKind::Exhaustive)).unwrap();
        let vectors: Vec<Vec<f32>> = (0..5).map(|i| axis(3, i % 3)).collect();
        index.add(&vectors, None).unwrap();
        index.add(&vectors[..1], None).unwrap();

        // 5 / 2 = 2 for the first shard, remainder to the last; then 1 more
        // vector lands in the last shard again (no rebalancing).
        assert_eq!(index.shard_sizes(), vec![2, 4]);
        let Shard::Exhaustive(first) = &index.shards()[0] else {
            panic!("expected exhaustive shard");
        };
        assert_eq!(first.ids(), &[0, 1]);
        let Shard::Exhaustive(last) = &index.shards()[1] else {
            panic!("expected exhaustive shard");
        };
        assert_eq!(last.ids(), &[2, 3, 4, 5]);
    }

    #[test]
    fn test_add_rejects_bad_input() {
        let mut index =
            ShardedIndex::create(IndexConfig::new(3, 2, ShardKind::Exhaustive)).unwrap();
        assert!(matches!(
            index.add(&[vec![1.0, 0.0]], None),
            Err(IndexError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert!(matches!(
            index.add(&[axis(3, 0)], Some(&[1, 2])),
            Err(IndexError::IdCountMismatch { .. })
        ));
        assert!(matches!(
            index.search(&[vec![1.0]], 1),
            Err(IndexError::DimensionMismatch { .. })
        ));
        assert!(index.is_empty());
    }

    #[test]
    fn test_search_normalizes_and_breaks_ties_by_shard_order() {
        let mut index =
            ShardedIndex::create(IndexConfig::new(2, 2, ShardKind::Exhaustive)).unwrap();
        let vectors = [vec![2.0, 0.0], vec![0.0, 1.0], vec![5.0, 0.0], vec![0.0, 3.0]];
        index.add(&vectors, Some(&[10, 11, 12, 13])).unwrap();

        let results = index.search(&[vec![3.0, 0.0]], 2).unwrap();
        assert_eq!(results.ids(), vec![vec![10, 12]]);
        let again = index.search(&[vec![3.0, 0.0]], 2).unwrap();
        assert_eq!(results, again);
    }

    #[test]
    fn test_optimize_is_idempotent() {
        let mut config = IndexConfig::new(4, 2, ShardKind::Partitioned);
        config.nlist = 2;
        config.nprobe = 2;
        let mut index = ShardedIndex::create(config).unwrap();
        let vectors: Vec<Vec<f32>> = (0..16).map(|i| axis(4, i % 4)).collect();
        index.add(&vectors, None).unwrap();
        assert!(index.shards().iter().all(|s| !s.is_trained()));

        index.optimize().unwrap();
        assert!(index.shards().iter().all(|s| s.is_trained()));
        let before = index.search(&[axis(4, 1)], 3).unwrap();

        index.optimize().unwrap();
        let after = index.search(&[axis(4, 1)], 3).unwrap();
        assert_eq!(before, after);
        assert!(before.rows[0].iter().all(|n| (n.score - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_optimize_skips_empty_shards() {
        let mut config = IndexConfig::new(2, 3, ShardKind::Partitioned);
        config.nlist = 2;
        let mut index = ShardedIndex::create(config).unwrap();
        index.add(&[axis(2, 0), axis(2, 1)], None).unwrap();
        index.optimize().unwrap();
        let trained: Vec<bool> = index.shards().iter().map(|s| s.is_trained()).collect();
        assert_eq!(trained, vec![false, false, true]);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = IndexConfig::new(4, 3, ShardKind::Partitioned);
        config.nlist = 2;
        config.nprobe = 1;
        let mut index = ShardedIndex::create(config).unwrap();
        let vectors: Vec<Vec<f32>> = (0..12)
            .map(|i| vec![1.0 + i as f32, (i % 3) as f32, (i % 5) as f32, 0.5])
            .collect();
        index.add(&vectors, None).unwrap();
        index.optimize().unwrap();

        let queries = vec![vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 1.0, 1.0, 0.0]];
        let expected = index.search(&queries, 4).unwrap();

        index.save(temp_dir.path()).unwrap();
        let loaded = ShardedIndex::load(temp_dir.path()).unwrap();
        assert_eq!(loaded.config(), index.config());
        assert_eq!(loaded.shard_sizes(), index.shard_sizes());
        assert_eq!(loaded.search(&queries, 4).unwrap(), expected);
    }

    #[test]
    fn test_load_requires_every_file() {
        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            ShardedIndex::load(temp_dir.path()),
            Err(IndexError::MissingConfig { .. })
        ));

        let index = ShardedIndex::create(IndexConfig::new(2, 2, ShardKind::Exhaustive)).unwrap();
        index.save(temp_dir.path()).unwrap();
        fs::remove_file(shard_path(temp_dir.path(), 1)).unwrap();
        assert!(matches!(
            ShardedIndex::load(temp_dir.path()),
            Err(IndexError::MissingShard { shard: 1, .. })
        ));
    }

    #[test]
    fn test_set_nprobe() {
        let mut index =
            ShardedIndex::create(IndexConfig::new(2, 1, ShardKind::Partitioned)).unwrap();
        index.set_nprobe(3).unwrap();
        assert_eq!(index.config().nprobe, 3);
        assert!(index.set_nprobe(0).is_err());
    }
}
