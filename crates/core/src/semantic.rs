use crate::error::{with_timeout, CoreError, Result};
use crate::graph::with_mirrors;
use crate::models::{Edge, EdgeFilter, EdgeType};
use crate::vectorstore::VectorIndex;
use std::sync::Arc;
use std::time::Duration;
use storage::Store;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct SemanticRebuild {
    pub nodes: usize,
    pub deleted: u64,
    pub inserted: usize,
    pub failed: usize,
}

/// Semantic edges from vector nearest neighbours.
///
/// Full rebuilds and per-node updates share one lock so their delete and
/// insert phases never interleave.
pub struct SemanticEdgeDiscovery {
    store: Store,
    index: Arc<dyn VectorIndex>,
    timeout: Duration,
    mirror_edges: bool,
    lock: Mutex<()>,
}

fn validate(top_k: usize, min_similarity: f64) -> Result<()> {
    if top_k == 0 {
        return Err(CoreError::InvalidArgument("top_k must be positive".into()));
    }
    if !(0.0..=1.0).contains(&min_similarity) {
        return Err(CoreError::InvalidArgument(format!(
            "min_similarity must lie in [0, 1], got {min_similarity}"
        )));
    }
    Ok(())
}

impl SemanticEdgeDiscovery {
    pub fn new(
        store: Store,
        index: Arc<dyn VectorIndex>,
        timeout: Duration,
        mirror_edges: bool,
    ) -> Self {
        Self {
            store,
            index,
            timeout,
            mirror_edges,
            lock: Mutex::new(()),
        }
    }

    async fn edges_for(&self, source: &str, top_k: usize, min_similarity: f64) -> Result<Vec<Edge>> {
        let hits = with_timeout(
            "nearest neighbours",
            self.timeout,
            self.index.nearest_neighbors(source, top_k),
        )
        .await?;
        Ok(hits
            .into_iter()
            .filter(|hit| hit.full_name != source && hit.score >= min_similarity)
            .map(|hit| {
                Edge::new(
                    source,
                    hit.full_name,
                    EdgeType::Semantic,
                    hit.score,
                    serde_json::json!({ "similarity": hit.score }),
                )
            })
            .collect())
    }

    /// Replaces every semantic edge with freshly computed neighbours.
    ///
    /// Neighbours are computed before the swap; the delete and the batch
    /// insert then run in one transaction. A node whose lookup fails is
    /// logged and contributes no edges.
    pub async fn rebuild_all(&self, top_k: usize, min_similarity: f64) -> Result<SemanticRebuild> {
        validate(top_k, min_similarity)?;
        let _guard = self.lock.lock().await;
        let nodes = self.store.all_repositories().await?;
        let mut outcome = SemanticRebuild {
            nodes: nodes.len(),
            ..SemanticRebuild::default()
        };
        let mut edges = Vec::new();
        for node in &nodes {
            match self.edges_for(&node.full_name, top_k, min_similarity).await {
                Ok(found) => edges.extend(found),
                Err(e) => {
                    outcome.failed += 1;
                    warn!(repo = %node.full_name, "semantic neighbours failed: {e}");
                }
            }
        }
        let edges = with_mirrors(edges, self.mirror_edges);
        let (deleted, inserted) = self
            .store
            .replace_edges(&EdgeFilter::OfType(EdgeType::Semantic), &edges)
            .await?;
        outcome.deleted = deleted;
        outcome.inserted = inserted;
        info!(
            nodes = outcome.nodes,
            inserted,
            failed = outcome.failed,
            "rebuilt semantic edges"
        );
        Ok(outcome)
    }

    /// Drops every semantic edge touching `full_name` and reinserts the
    /// node's own neighbours. Incoming edges contributed by other nodes come
    /// back with their own update or the next full rebuild.
    pub async fn update_for_node(
        &self,
        full_name: &str,
        top_k: usize,
        min_similarity: f64,
    ) -> Result<usize> {
        validate(top_k, min_similarity)?;
        let _guard = self.lock.lock().await;
        let edges = self.edges_for(full_name, top_k, min_similarity).await?;
        let edges = with_mirrors(edges, self.mirror_edges);
        let filter = EdgeFilter::Touching {
            edge_type: EdgeType::Semantic,
            node: full_name.to_string(),
        };
        let (deleted, inserted) = self.store.replace_edges(&filter, &edges).await?;
        debug!(repo = %full_name, deleted, inserted, "updated semantic edges");
        Ok(inserted)
    }
}
