//! Per-corpus vector store with nearest-neighbor search.
//!
//! Records are embedded with the caller-supplied [`EmbeddingModel`] and
//! appended to a collection identified by `(corpus, model_name)`, so
//! vectors from different embedders never get compared. There is no
//! update-in-place: re-ingesting a record appends a new row.
//!
//! Search is brute-force cosine similarity over every vector in the
//! collection. Vectors are stored as little-endian `f32` BLOBs.
//!
//! Two implementations:
//! - [`SqliteVectorIndex`]: the `vectors` table; durability and row-level
//!   locking are left to SQLite.
//! - [`InMemoryVectorIndex`]: same contract, process-local, for tests.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::models::{Metadata, Record, SearchHit};
use crate::providers::EmbeddingModel;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Embed `record.text` and append it to `corpus`.
    async fn put(&self, corpus: &str, embedder: &dyn EmbeddingModel, record: &Record)
        -> Result<()>;

    /// Up to `k` records of `corpus` closest to `query`, closest first.
    async fn search(
        &self,
        corpus: &str,
        embedder: &dyn EmbeddingModel,
        query: &str,
        k: usize,
    ) -> Result<Vec<SearchHit>>;
}

/// Encode a float vector as a BLOB for SQLite storage.
///
/// Each `f32` is written as 4 little-endian bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, or a zero vector.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Sort hits closest first and keep the best `k`. Ties keep insertion order.
fn top_k(mut hits: Vec<SearchHit>, k: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(k);
    hits
}

async fn embed(embedder: &dyn EmbeddingModel, text: &str) -> Result<Vec<f32>> {
    let vector = embedder.embed(text).await?;
    if vector.is_empty() {
        return Err(Error::Upstream(anyhow!(
            "embedder '{}' returned an empty vector",
            embedder.model_name()
        )));
    }
    Ok(vector)
}

fn dims_mismatch(corpus: &str, model: &str, pinned: usize, got: usize) -> Error {
    Error::Upstream(anyhow!(
        "collection {}/{} holds {}-dim vectors, embedder returned {}",
        corpus,
        model,
        pinned,
        got
    ))
}

type CollectionKey = (String, String);

// ═══════════════════════════════════════════════════════════════════════
// SQLite
// ═══════════════════════════════════════════════════════════════════════

pub struct SqliteVectorIndex {
    pool: SqlitePool,
    /// Pinned dimensionality of collections known to hold rows. An empty
    /// collection is never cached: another handle may fill it.
    collections: Mutex<HashMap<CollectionKey, usize>>,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            collections: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve (and cache) the dimensionality already stored for a collection.
    async fn pinned_dims(&self, corpus: &str, model: &str) -> Result<Option<usize>> {
        let mut collections = self.collections.lock().await;
        let key = (corpus.to_string(), model.to_string());
        if let Some(dims) = collections.get(&key) {
            return Ok(Some(*dims));
        }

        let dims: Option<i64> = sqlx::query_scalar(
            "SELECT dims FROM vectors WHERE collection = ? AND model = ? LIMIT 1",
        )
        .bind(corpus)
        .bind(model)
        .fetch_optional(&self.pool)
        .await?;
        let dims = dims.map(|d| d as usize);
        if let Some(dims) = dims {
            collections.insert(key, dims);
        }
        Ok(dims)
    }

    async fn pin_dims(&self, corpus: &str, model: &str, dims: usize) -> Result<()> {
        let mut collections = self.collections.lock().await;
        let pinned = *collections
            .entry((corpus.to_string(), model.to_string()))
            .or_insert(dims);
        if pinned != dims {
            return Err(dims_mismatch(corpus, model, pinned, dims));
        }
        Ok(())
    }

    /// Number of stored rows for a corpus, across embedders.
    pub async fn count(&self, corpus: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors WHERE collection = ?")
            .bind(corpus)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn put(
        &self,
        corpus: &str,
        embedder: &dyn EmbeddingModel,
        record: &Record,
    ) -> Result<()> {
        let model = embedder.model_name();
        // Load the pinned size before embedding so a mismatch is caught on the first row.
        self.pinned_dims(corpus, model).await?;
        let vector = embed(embedder, &record.text).await?;
        self.pin_dims(corpus, model, vector.len()).await?;

        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO vectors (collection, record_id, model, dims, text, metadata_json, embedding, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(corpus)
        .bind(&record.id)
        .bind(model)
        .bind(vector.len() as i64)
        .bind(&record.text)
        .bind(serde_json::to_string(&record.metadata)?)
        .bind(vec_to_blob(&vector))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn search(
        &self,
        corpus: &str,
        embedder: &dyn EmbeddingModel,
        query: &str,
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        let model = embedder.model_name();
        if k == 0 || self.pinned_dims(corpus, model).await?.is_none() {
            return Ok(Vec::new());
        }

        let query_vec = embed(embedder, query).await?;

        let rows = sqlx::query(
            "SELECT record_id, text, metadata_json, embedding FROM vectors WHERE collection = ? AND model = ? ORDER BY id",
        )
        .bind(corpus)
        .bind(model)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let metadata_json: String = row.get("metadata_json");
            let metadata: Metadata = serde_json::from_str(&metadata_json)?;
            hits.push(SearchHit {
                id: row.get("record_id"),
                text: row.get("text"),
                metadata,
                score: cosine_similarity(&query_vec, &blob_to_vec(&blob)),
            });
        }

        Ok(top_k(hits, k))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// In-memory
// ═══════════════════════════════════════════════════════════════════════

struct StoredVector {
    record: Record,
    vector: Vec<f32>,
}

#[derive(Default)]
pub struct InMemoryVectorIndex {
    collections: RwLock<HashMap<CollectionKey, Vec<StoredVector>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, corpus: &str) -> usize {
        self.collections
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|((c, _), _)| c == corpus)
            .map(|(_, v)| v.len())
            .sum()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn put(
        &self,
        corpus: &str,
        embedder: &dyn EmbeddingModel,
        record: &Record,
    ) -> Result<()> {
        let vector = embed(embedder, &record.text).await?;
        let model = embedder.model_name();

        let mut collections = self.collections.write().unwrap_or_else(|p| p.into_inner());
        let rows = collections
            .entry((corpus.to_string(), model.to_string()))
            .or_default();
        if let Some(first) = rows.first() {
            if first.vector.len() != vector.len() {
                return Err(dims_mismatch(corpus, model, first.vector.len(), vector.len()));
            }
        }
        rows.push(StoredVector {
            record: record.clone(),
            vector,
        });
        Ok(())
    }

    async fn search(
        &self,
        corpus: &str,
        embedder: &dyn EmbeddingModel,
        query: &str,
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        let key = (corpus.to_string(), embedder.model_name().to_string());
        let empty = self
            .collections
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&key)
            .map_or(true, |rows| rows.is_empty());
        if k == 0 || empty {
            return Ok(Vec::new());
        }

        let query_vec = embed(embedder, query).await?;

        let collections = self.collections.read().unwrap_or_else(|p| p.into_inner());
        let hits = collections
            .get(&key)
            .map(|rows| {
                rows.iter()
                    .map(|row| SearchHit {
                        id: row.record.id.clone(),
                        text: row.record.text.clone(),
                        metadata: row.record.metadata.clone(),
                        score: cosine_similarity(&query_vec, &row.vector),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(top_k(hits, k))
    }
}
