use docqa_retrieval::IndexError;
use docqa_retrieval::vector::{IndexConfig, ShardKind, ShardedIndex, shard_path};
use tempfile::TempDir;

use crate::common::random_vectors;

fn round_trip(kind: ShardKind) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = IndexConfig::new(12, 3, kind);
    config.nlist = 5;
    config.nprobe = 2;

    let mut index = ShardedIndex::create(config).unwrap();
    index.add(&random_vectors(150, 12, 21), None).unwrap();
    index.optimize().unwrap();
    // Vectors added after training go straight to their lists
    index.add(&random_vectors(20, 12, 22), None).unwrap();

    let queries = random_vectors(6, 12, 23);
    let before = index.search(&queries, 8).unwrap();

    index.save(temp_dir.path()).unwrap();
    let restored = ShardedIndex::load(temp_dir.path()).unwrap();

    assert_eq!(restored.config(), index.config());
    assert_eq!(restored.shard_sizes(), index.shard_sizes());
    assert_eq!(restored.search(&queries, 8).unwrap(), before);
}

#[test]
fn test_exhaustive_round_trip() {
    round_trip(ShardKind::Exhaustive);
}

#[test]
fn test_partitioned_round_trip() {
    round_trip(ShardKind::Partitioned);
}

#[test]
fn test_missing_shard_file() {
    let temp_dir = TempDir::new().unwrap();
    let mut index = ShardedIndex::create(IndexConfig::new(4, 2, ShardKind::Exhaustive)).unwrap();
    index.add(&random_vectors(10, 4, 1), None).unwrap();
    index.save(temp_dir.path()).unwrap();

    std::fs::remove_file(shard_path(temp_dir.path(), 1)).unwrap();
    assert!(matches!(
        ShardedIndex::load(temp_dir.path()),
        Err(IndexError::MissingShard { shard: 1, .. })
    ));
}

#[test]
fn test_missing_config() {
    let temp_dir = TempDir::new().unwrap();
    assert!(matches!(
        ShardedIndex::load(temp_dir.path()),
        Err(IndexError::MissingConfig { .. })
    ));
}

#[test]
fn test_corrupted_shard_file() {
    let temp_dir = TempDir::new().unwrap();
    let mut index = ShardedIndex::create(IndexConfig::new(4, 1, ShardKind::Exhaustive)).unwrap();
    index.add(&random_vectors(3, 4, 2), None).unwrap();
    index.save(temp_dir.path()).unwrap();

    std::fs::write(shard_path(temp_dir.path(), 0), b"not a shard").unwrap();
    let err = ShardedIndex::load(temp_dir.path()).unwrap_err();
    assert_eq!(err.status_code(), "INDEX_CORRUPTED");
}
