use crate::embeddings::{self, EmbeddingRequest};
use crate::error::{CoreError, Result};
use crate::models::Repository;
use providers::qdrant::{QdrantClient, QdrantPoint, SearchResult};
use providers::ProviderRegistry;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// A neighbour reported by the vector index; `score` is clamped to [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorHit {
    pub full_name: String,
    pub score: f64,
}

/// Vector-similarity collaborator over repository embeddings.
#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<VectorHit>>;
    /// Neighbours of an indexed repository, excluding the repository itself.
    async fn nearest_neighbors(&self, full_name: &str, top_k: usize) -> Result<Vec<VectorHit>>;
    async fn upsert(&self, repos: &[Repository]) -> Result<()>;
    async fn remove(&self, full_name: &str) -> Result<()>;
}

/// Stable Qdrant point id for a repository identity.
pub fn point_id(full_name: &str) -> u64 {
    let hash = blake3::hash(full_name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

pub struct QdrantIndex {
    client: QdrantClient,
    registry: ProviderRegistry,
    batch_size: usize,
    collection_ready: AtomicBool,
}

impl QdrantIndex {
    pub fn new(client: QdrantClient, registry: ProviderRegistry, batch_size: usize) -> Self {
        Self {
            client,
            registry,
            batch_size: batch_size.max(1),
            collection_ready: AtomicBool::new(false),
        }
    }

    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let result = embeddings::embed(
            EmbeddingRequest {
                texts,
                provider: None,
            },
            &self.registry,
        )
        .await?;
        Ok(result.vectors)
    }

    fn to_hits(results: Vec<SearchResult>, exclude: Option<&str>) -> Vec<VectorHit> {
        results
            .into_iter()
            .filter_map(|r| {
                let full_name = r.payload_str("full_name")?.to_string();
                if exclude == Some(full_name.as_str()) {
                    return None;
                }
                Some(VectorHit {
                    full_name,
                    score: f64::from(r.score).clamp(0.0, 1.0),
                })
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl VectorIndex for QdrantIndex {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<VectorHit>> {
        let vector = self
            .embed_texts(vec![query.to_string()])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();
        if vector.is_empty() {
            return Ok(Vec::new());
        }
        let resp = self.client.search(vector, top_k as u64, None).await?;
        Ok(Self::to_hits(resp.result, None))
    }

    async fn nearest_neighbors(&self, full_name: &str, top_k: usize) -> Result<Vec<VectorHit>> {
        let resp = self
            .client
            .recommend(point_id(full_name), top_k as u64)
            .await?;
        Ok(Self::to_hits(resp.result, Some(full_name)))
    }

    async fn upsert(&self, repos: &[Repository]) -> Result<()> {
        for batch in repos.chunks(self.batch_size) {
            let texts = batch.iter().map(embeddings::repository_text).collect();
            let vectors = self.embed_texts(texts).await?;
            if vectors.len() != batch.len() {
                return Err(CoreError::InvalidArgument(format!(
                    "embedding provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            let points: Vec<QdrantPoint> = batch
                .iter()
                .zip(vectors)
                .filter(|(_, vector)| !vector.is_empty())
                .map(|(repo, vector)| {
                    let mut payload = HashMap::new();
                    payload.insert("full_name".to_string(), serde_json::json!(repo.full_name));
                    payload.insert("owner".to_string(), serde_json::json!(repo.owner));
                    payload.insert("stars".to_string(), serde_json::json!(repo.stars));
                    if let Some(lang) = &repo.language {
                        payload.insert("language".to_string(), serde_json::json!(lang));
                    }
                    QdrantPoint {
                        id: point_id(&repo.full_name),
                        vector,
                        payload,
                    }
                })
                .collect();
            let Some(first) = points.first() else {
                continue;
            };
            if !self.collection_ready.load(Ordering::Acquire) {
                self.client.ensure_collection(first.vector.len()).await?;
                self.collection_ready.store(true, Ordering::Release);
            }
            self.client.upsert(points).await?;
        }
        Ok(())
    }

    async fn remove(&self, full_name: &str) -> Result<()> {
        let filter = serde_json::json!({
            "must": [{ "key": "full_name", "match": { "value": full_name } }]
        });
        self.client.delete_by_filter(filter).await?;
        Ok(())
    }
}
