//! Sharded vector index for retrieval.
//!
//! A fixed-dimension vector space split into independent shards. Each shard
//! is either an exhaustive scan or an inverted-file index trained with
//! K-means; searches run on every shard and are merged into one ranked list.
//!
//! # Architecture
//! - `types`: dimensions, hits, normalization helpers
//! - `clustering`: K-means used to train inverted-file shards
//! - `shard`: shard kinds behind the [`ShardBackend`] capability trait
//! - `storage`: per-shard binary files
//! - `index`: [`ShardedIndex`], the add/search/optimize/save/load surface

mod clustering;
mod index;
mod placement;
mod shard;
mod storage;
mod types;

pub use clustering::{ClusteringError, KMeansResult, kmeans_clustering, nearest_centroid};
pub use index::{CONFIG_FILE, IndexConfig, MAX_TRAINING_SAMPLE, ShardedIndex};
pub use placement::{Placement, accelerator_available};
pub use shard::{FlatShard, IvfShard, Shard, ShardBackend, ShardKind};
pub use storage::shard_path;
pub use types::{
    Neighbor, SearchResults, VectorDimension, VectorId, inner_product, normalize_vector,
    normalize_vector_copy,
};
