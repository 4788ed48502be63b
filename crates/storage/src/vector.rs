//! Brute-force vector index with cosine similarity search.
//!
//! Storage location: `{working_dir}/vdb_{namespace}.json`. Contents are
//! embedded in batches through the configured `Embedder`; batches run
//! concurrently and the embedder is expected to cap in-flight calls.

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use timegraph_core::{Embedder, StorageError, VectorMatch, VectorRecord, VectorStore};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::persist::{read_json, write_json};

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if the lengths differ or either vector is empty or zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredVector {
    content: String,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
    vector: Vec<f32>,
}

pub struct NanoVectorStore {
    namespace: String,
    path: Option<PathBuf>,
    embedder: Arc<dyn Embedder>,
    batch_num: usize,
    better_than_threshold: f32,
    records: Arc<RwLock<BTreeMap<String, StoredVector>>>,
}

impl NanoVectorStore {
    /// Open the namespace under `working_dir`, loading any existing file.
    pub fn open(
        working_dir: &Path,
        namespace: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, StorageError> {
        let path = working_dir.join(format!("vdb_{namespace}.json"));
        let records: BTreeMap<String, StoredVector> = read_json(&path)?.unwrap_or_default();
        debug!(namespace, count = records.len(), "Vector store loaded");
        Ok(Self {
            namespace: namespace.to_string(),
            path: Some(path),
            embedder,
            batch_num: 32,
            better_than_threshold: 0.2,
            records: Arc::new(RwLock::new(records)),
        })
    }

    /// A scratch index that is never written to disk.
    pub fn in_memory(namespace: &str, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            namespace: namespace.to_string(),
            path: None,
            embedder,
            batch_num: 32,
            better_than_threshold: 0.2,
            records: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub fn with_batch_num(mut self, batch_num: usize) -> Self {
        self.batch_num = batch_num.max(1);
        self
    }

    /// Matches scoring below `threshold` are dropped from query results.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.better_than_threshold = threshold;
        self
    }
}

#[async_trait]
impl VectorStore for NanoVectorStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn upsert(&self, records: BTreeMap<String, VectorRecord>) -> Result<(), StorageError> {
        if records.is_empty() {
            warn!(namespace = %self.namespace, "Upserting an empty batch into vector store");
            return Ok(());
        }

        let (ids, records): (Vec<String>, Vec<VectorRecord>) = records.into_iter().unzip();
        let contents: Vec<String> = records.iter().map(|r| r.content.clone()).collect();

        let batches = contents
            .chunks(self.batch_num)
            .map(|batch| self.embedder.embed(batch));
        let vectors: Vec<Vec<f32>> = try_join_all(batches).await?.into_iter().flatten().collect();

        if vectors.len() != ids.len() {
            return Err(StorageError::EmbeddingFailed(format!(
                "Expected {} vectors, embedder returned {}",
                ids.len(),
                vectors.len()
            )));
        }

        let mut stored = self.records.write().await;
        for ((id, record), vector) in ids.into_iter().zip(records).zip(vectors) {
            stored.insert(
                id,
                StoredVector {
                    content: record.content,
                    metadata: record.metadata,
                    vector,
                },
            );
        }
        debug!(namespace = %self.namespace, count = stored.len(), "Vector store upserted");
        Ok(())
    }

    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<VectorMatch>, StorageError> {
        let query_vector = self
            .embedder
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::EmbeddingFailed("No vector for query".into()))?;

        let records = self.records.read().await;
        let mut scored: Vec<VectorMatch> = records
            .iter()
            .filter_map(|(id, stored)| {
                let score = cosine_similarity(&stored.vector, &query_vector);
                (score >= self.better_than_threshold).then(|| VectorMatch {
                    id: id.clone(),
                    score,
                    metadata: stored.metadata.clone(),
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.records.read().await.len())
    }

    async fn flush(&self) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let records = self.records.read().await;
        write_json(path, &*records).await?;
        debug!(namespace = %self.namespace, count = records.len(), "Vector store flushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use timegraph_core::ProviderError;

    /// Maps a text to a vector by counting a few marker letters.
    struct LetterEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for LetterEmbedder {
        fn dim(&self) -> usize {
            3
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    ['a', 'b', 'c']
                        .iter()
                        .map(|ch| t.chars().filter(|c| c == ch).count() as f32)
                        .collect()
                })
                .collect())
        }
    }

    fn record(content: &str, name: &str) -> VectorRecord {
        let mut metadata = serde_json::Map::new();
        metadata.insert("entity_name".into(), serde_json::json!(name));
        VectorRecord { content: content.into(), metadata }
    }

    #[test]
    fn cosine_identical_and_orthogonal() {
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn query_ranks_by_similarity_and_applies_threshold() {
        let embedder = Arc::new(LetterEmbedder { calls: AtomicUsize::new(0) });
        let store = NanoVectorStore::in_memory("entities", embedder).with_threshold(0.5);
        store
            .upsert(BTreeMap::from([
                ("ent-1".to_string(), record("aaa", "A")),
                ("ent-2".to_string(), record("aab", "AB")),
                ("ent-3".to_string(), record("ccc", "C")),
            ]))
            .await
            .unwrap();

        let hits = store.query("a", 10).await.unwrap();
        let names: Vec<&str> = hits.iter().filter_map(|h| h.meta_str("entity_name")).collect();
        assert_eq!(names, vec!["A", "AB"]);
    }

    #[tokio::test]
    async fn upsert_embeds_in_batches() {
        let embedder = Arc::new(LetterEmbedder { calls: AtomicUsize::new(0) });
        let store = NanoVectorStore::in_memory("entities", embedder.clone()).with_batch_num(2);
        let records = (0..5)
            .map(|i| (format!("ent-{i}"), record("abc", "X")))
            .collect();
        store.upsert(records).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn flush_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(LetterEmbedder { calls: AtomicUsize::new(0) });
        {
            let store = NanoVectorStore::open(dir.path(), "entities", embedder.clone()).unwrap();
            store
                .upsert(BTreeMap::from([("ent-1".to_string(), record("abc", "A"))]))
                .await
                .unwrap();
            store.flush().await.unwrap();
        }
        let reopened = NanoVectorStore::open(dir.path(), "entities", embedder).unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
    }
}
