use docqa_retrieval::vector::{IndexConfig, ShardBackend, ShardKind, ShardedIndex};

use crate::common::{brute_force, random_vectors};

#[test]
fn test_exhaustive_shards_match_linear_scan() {
    let vectors = random_vectors(211, 16, 7);
    let queries = random_vectors(12, 16, 99);

    for num_shards in [1, 2, 5, 8] {
        let mut index =
            ShardedIndex::create(IndexConfig::new(16, num_shards, ShardKind::Exhaustive)).unwrap();
        index.add(&vectors, None).unwrap();
        assert_eq!(index.len(), vectors.len());

        let results = index.search(&queries, 10).unwrap();
        for (query, row) in queries.iter().zip(&results.rows) {
            let expected = brute_force(&vectors, query, 10);
            assert_eq!(row.len(), expected.len());
            for (hit, (id, score)) in row.iter().zip(&expected) {
                assert!(
                    (hit.score - score).abs() < 1e-5,
                    "shards={num_shards}: {} vs {score}",
                    hit.score
                );
                if hit.id != *id {
                    // Only acceptable when the two candidates tie
                    let alt = expected.iter().find(|(i, _)| *i == hit.id).unwrap();
                    assert!((alt.1 - score).abs() < 1e-5);
                }
            }
        }
    }
}

#[test]
fn test_axis_vectors_find_themselves() {
    let mut index = ShardedIndex::create(IndexConfig::new(4, 2, ShardKind::Exhaustive)).unwrap();
    let axes = vec![
        vec![1.0, 0.0, 0.0, 0.0],
        vec![0.0, 1.0, 0.0, 0.0],
        vec![0.0, 0.0, 1.0, 0.0],
        vec![0.0, 0.0, 0.0, 1.0],
    ];
    index.add(&axes, Some(&[0, 1, 2, 3])).unwrap();
    assert_eq!(index.shard_sizes(), vec![2, 2]);

    let results = index.search(&[vec![1.0, 0.0, 0.0, 0.0]], 1).unwrap();
    assert_eq!(results.ids(), vec![vec![0]]);
    assert!((results.rows[0][0].score - 1.0).abs() < 1e-6);
}

#[test]
fn test_partitioned_full_probe_matches_linear_scan() {
    let vectors = random_vectors(300, 8, 3);
    let queries = random_vectors(5, 8, 4);

    let mut config = IndexConfig::new(8, 3, ShardKind::Partitioned);
    config.nlist = 4;
    config.nprobe = 4;
    let mut index = ShardedIndex::create(config).unwrap();
    index.add(&vectors, None).unwrap();
    index.optimize().unwrap();
    assert!(index.shards().iter().all(|shard| shard.is_trained()));

    // Probing every list is an exact search
    let results = index.search(&queries, 5).unwrap();
    for (query, row) in queries.iter().zip(&results.rows) {
        let expected = brute_force(&vectors, query, 5);
        for (hit, (_, score)) in row.iter().zip(&expected) {
            assert!((hit.score - score).abs() < 1e-5);
        }
    }
}

#[test]
fn test_optimize_is_idempotent() {
    let vectors = random_vectors(120, 8, 11);
    let mut config = IndexConfig::new(8, 2, ShardKind::Partitioned);
    config.nlist = 6;
    config.nprobe = 2;
    let mut index = ShardedIndex::create(config).unwrap();
    index.add(&vectors, None).unwrap();

    index.optimize().unwrap();
    let queries = random_vectors(4, 8, 12);
    let first = index.search(&queries, 7).unwrap();

    index.optimize().unwrap();
    assert_eq!(index.search(&queries, 7).unwrap(), first);
}

#[test]
fn test_dimension_mismatch_is_index_error() {
    let mut index = ShardedIndex::create(IndexConfig::new(4, 2, ShardKind::Exhaustive)).unwrap();
    let err = index.add(&[vec![1.0, 2.0]], None).unwrap_err();
    assert_eq!(err.status_code(), "DIMENSION_MISMATCH");
    assert!(index.search(&[vec![1.0; 5]], 1).is_err());
}
