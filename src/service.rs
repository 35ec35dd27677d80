//! Query and ingestion paths.
//!
//! A query passes the `embedding` limiter, is encoded, passes the
//! `retrieval` limiter, is searched and is streamed back as ranked hits.
//! Ingestion encodes first and is then gated by the `ingestion` limiter
//! before the vectors reach the index.

use std::path::Path;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::encoder::Encoder;
use crate::error::{ConfigurationError, EncodeError, IndexError, Result};
use crate::ratelimit::{EMBEDDING, INGESTION, LimiterRegistry, RETRIEVAL};
use crate::streaming::{RecordStream, ResultStreamer, StreamingConfig};
use crate::vector::{CONFIG_FILE, ShardBackend, ShardKind, ShardedIndex, VectorId};

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: VectorId,
    pub score: f32,
    /// 1-based position in the merged ranking.
    pub rank: usize,
}

/// Per-shard view reported by [`RetrievalService::stats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShardStats {
    pub ordinal: usize,
    pub kind: ShardKind,
    pub vectors: usize,
    pub trained: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub dimension: usize,
    pub total_vectors: usize,
    pub nprobe: usize,
    pub shards: Vec<ShardStats>,
}

pub struct RetrievalService {
    limiters: Arc<LimiterRegistry>,
    encoder: Arc<dyn Encoder>,
    index: RwLock<ShardedIndex>,
    streamer: ResultStreamer,
}

impl RetrievalService {
    /// Fails when the encoder and the index disagree on the dimension.
    pub fn new(
        index: ShardedIndex,
        encoder: Arc<dyn Encoder>,
        limiters: Arc<LimiterRegistry>,
        streaming: StreamingConfig,
    ) -> Result<Self> {
        let expected = index.dimension().get();
        let actual = encoder.dimension().get();
        if expected != actual {
            return Err(IndexError::DimensionMismatch { expected, actual }.into());
        }

        Ok(Self {
            limiters,
            encoder,
            index: RwLock::new(index),
            streamer: ResultStreamer::new(streaming)?,
        })
    }

    /// Opens the index saved at the configured path, or creates an empty one
    /// when nothing has been saved there yet.
    pub fn from_settings(settings: &Settings, encoder: Arc<dyn Encoder>) -> Result<Self> {
        let dir = settings.index_dir();
        let index = if dir.join(CONFIG_FILE).exists() {
            ShardedIndex::load(&dir)?
        } else {
            tracing::info!(path = %dir.display(), "no saved index, starting empty");
            ShardedIndex::create(settings.index.index_config())?
        };

        Self::new(
            index,
            encoder,
            Arc::new(LimiterRegistry::from_settings(settings)),
            settings.streaming.clone(),
        )
    }

    /// Runs one query and streams its top `k` hits, best first.
    pub async fn query(&self, text: &str, k: usize) -> Result<RecordStream<SearchHit>> {
        self.limiters.get_limiter(EMBEDDING, None)?.check().await?;
        let vector = self.encode_one(text)?;

        self.limiters.get_limiter(RETRIEVAL, None)?.check().await?;
        let results = self.index.read().search(&[vector], k)?;

        let hits: Vec<SearchHit> = results
            .rows
            .into_iter()
            .next()
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, neighbor)| SearchHit {
                id: neighbor.id,
                score: neighbor.score,
                rank: i + 1,
            })
            .collect();
        tracing::debug!(k, hits = hits.len(), "query answered");

        Ok(self.streamer.stream_results(hits, None)?)
    }

    /// Encodes and stores `texts`. Returns the number of vectors added.
    ///
    /// The batch costs one ingestion token per text, capped at the
    /// limiter's burst size so large batches can still be admitted.
    pub async fn ingest(&self, texts: &[&str], ids: Option<&[VectorId]>) -> Result<usize> {
        if texts.is_empty() {
            return Ok(0);
        }
        if let Some(ids) = ids
            && ids.len() != texts.len()
        {
            return Err(IndexError::IdCountMismatch {
                vectors: texts.len(),
                ids: ids.len(),
            }
            .into());
        }

        let vectors = self.encoder.encode(texts)?;

        let limiter = self.limiters.get_limiter(INGESTION, None)?;
        let cost = u32::try_from(texts.len())
            .unwrap_or(u32::MAX)
            .min(limiter.config().burst_size);
        limiter.check_tokens(cost).await?;

        self.index.write().add(&vectors, ids)?;
        tracing::debug!(count = vectors.len(), "ingested batch");
        Ok(vectors.len())
    }

    /// Trains untrained partitioned shards.
    pub fn optimize(&self) -> Result<()> {
        Ok(self.index.write().optimize()?)
    }

    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        Ok(self.index.read().save(dir)?)
    }

    /// Replaces the served index with the one saved in `dir`.
    pub fn load(&self, dir: impl AsRef<Path>) -> Result<()> {
        let loaded = ShardedIndex::load(dir)?;
        let expected = self.encoder.dimension().get();
        let actual = loaded.dimension().get();
        if expected != actual {
            return Err(IndexError::DimensionMismatch { expected, actual }.into());
        }
        *self.index.write() = loaded;
        Ok(())
    }

    pub fn set_nprobe(&self, nprobe: usize) -> std::result::Result<(), ConfigurationError> {
        self.index.write().set_nprobe(nprobe)
    }

    pub fn stats(&self) -> IndexStats {
        let index = self.index.read();
        IndexStats {
            dimension: index.dimension().get(),
            total_vectors: index.len(),
            nprobe: index.config().nprobe,
            shards: index
                .shards()
                .iter()
                .enumerate()
                .map(|(ordinal, shard)| ShardStats {
                    ordinal,
                    kind: shard.kind(),
                    vectors: shard.len(),
                    trained: shard.is_trained(),
                })
                .collect(),
        }
    }

    pub fn index(&self) -> RwLockReadGuard<'_, ShardedIndex> {
        self.index.read()
    }

    pub fn limiters(&self) -> &LimiterRegistry {
        &self.limiters
    }

    fn encode_one(&self, text: &str) -> Result<Vec<f32>> {
        self.encoder
            .encode(&[text])?
            .pop()
            .ok_or_else(|| EncodeError("encoder returned no vector".to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::HashingEncoder;
    use crate::ratelimit::RateLimitConfig;
    use crate::vector::{IndexConfig, VectorDimension};
    use std::collections::HashMap;
    use tempfile::TempDir;
    use tokio_stream::StreamExt;

    const DIM: usize = 32;

    fn service(limits: HashMap<String, RateLimitConfig>) -> RetrievalService {
        let index = ShardedIndex::create(IndexConfig::new(DIM, 3, ShardKind::Exhaustive)).unwrap();
        let encoder = Arc::new(HashingEncoder::new(VectorDimension::new(DIM).unwrap()));
        RetrievalService::new(
            index,
            encoder,
            Arc::new(LimiterRegistry::new(limits)),
            StreamingConfig {
                chunk_size: 2,
                ..StreamingConfig::default()
            },
        )
        .unwrap()
    }

    const DOCS: [&str; 5] = [
        "sharded vector index search",
        "token bucket rate limiting",
        "bounded buffer backpressure",
        "kmeans clustering of centroids",
        "sliding window request counter",
    ];

    #[tokio::test(start_paused = true)]
    async fn test_query_returns_ranked_hits() {
        let service = service(crate::ratelimit::default_rate_limits());
        assert_eq!(service.ingest(&DOCS, None).await.unwrap(), 5);

        let hits: Vec<_> = service
            .query("bucket rate limiting", 3)
            .await
            .unwrap()
            .map(|r| r.unwrap().record)
            .collect()
            .await;

        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, 1);
        let ranks: Vec<usize> = hits.iter().map(|h| h.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_rejected_by_retrieval_limiter() {
        let mut limits = crate::ratelimit::default_rate_limits();
        limits.insert(RETRIEVAL.to_string(), RateLimitConfig::new(1.0, 1, 60.0, 0.0));
        let service = service(limits);
        service.ingest(&DOCS, None).await.unwrap();

        assert!(service.query("buffer", 1).await.is_ok());
        let err = service.query("buffer", 1).await.err().unwrap();
        assert!(err.is_rejection());

        let metrics = service.limiters().all_metrics();
        assert_eq!(metrics[RETRIEVAL].rejected_requests, 1);
        assert_eq!(metrics[EMBEDDING].total_requests, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_batch_costs_at_most_burst() {
        let mut limits = crate::ratelimit::default_rate_limits();
        limits.insert(INGESTION.to_string(), RateLimitConfig::new(1.0, 2, 60.0, 0.0));
        let service = service(limits);

        // Five texts against a burst of two still fit in one admission
        assert_eq!(service.ingest(&DOCS, None).await.unwrap(), 5);
        assert!(service.ingest(&DOCS[..1], None).await.unwrap_err().is_rejection());
        assert_eq!(service.stats().total_vectors, 5);
    }

    #[tokio::test]
    async fn test_id_count_checked_before_encoding() {
        let service = service(crate::ratelimit::default_rate_limits());
        let err = service.ingest(&DOCS[..2], Some(&[7])).await.unwrap_err();
        assert_eq!(err.status_code(), "ID_COUNT_MISMATCH");
        assert!(service.limiters().all_metrics().is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(crate::ratelimit::default_rate_limits());
        service.ingest(&DOCS, Some(&[10, 20, 30, 40, 50])).await.unwrap();
        service.save(temp_dir.path()).unwrap();

        let restored = self::service(crate::ratelimit::default_rate_limits());
        restored.load(temp_dir.path()).unwrap();
        assert_eq!(restored.stats(), service.stats());

        let hit = restored
            .query("kmeans clustering", 1)
            .await
            .unwrap()
            .next()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.record.id, 40);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let index = ShardedIndex::create(IndexConfig::new(8, 1, ShardKind::Exhaustive)).unwrap();
        let encoder = Arc::new(HashingEncoder::new(VectorDimension::new(16).unwrap()));
        let result = RetrievalService::new(
            index,
            encoder,
            Arc::new(LimiterRegistry::default()),
            StreamingConfig::default(),
        );
        assert!(matches!(
            result,
            Err(crate::error::Error::Index(IndexError::DimensionMismatch { .. }))
        ));
    }
}
