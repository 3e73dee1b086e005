//! Graph plus semantic recall, fused and capped per owner.

use crate::config::RecommendConfig;
use crate::error::{with_timeout, CoreError, Result};
use crate::models::{EdgeType, ScoredCandidate, Signal};
use crate::vectorstore::VectorIndex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use storage::Store;
use tracing::{debug, warn};

const GRAPH_TYPES: [EdgeType; 3] = [EdgeType::Author, EdgeType::Ecosystem, EdgeType::Collection];

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub full_name: String,
    pub owner: String,
    pub final_score: f64,
    pub sources: Vec<String>,
    pub graph_score: Option<f64>,
    pub semantic_score: Option<f64>,
}

impl From<ScoredCandidate> for Recommendation {
    fn from(c: ScoredCandidate) -> Self {
        Self {
            owner: c.owner().to_string(),
            full_name: c.full_name,
            final_score: c.final_score,
            sources: c.sources,
            graph_score: c.graph_score,
            semantic_score: c.semantic_score,
        }
    }
}

/// Fusion parameters; absent signals count as zero in the formula.
#[derive(Debug, Clone, Copy)]
pub struct RecommendWeights {
    pub author: f64,
    pub ecosystem: f64,
    pub collection: f64,
    pub graph: f64,
    pub semantic: f64,
    pub graph_normalizer: f64,
}

impl RecommendWeights {
    pub fn type_weight(&self, edge_type: EdgeType) -> f64 {
        match edge_type {
            EdgeType::Author => self.author,
            EdgeType::Ecosystem => self.ecosystem,
            EdgeType::Collection => self.collection,
            EdgeType::Semantic => 0.0,
        }
    }

    pub fn fuse(&self, graph: Option<f64>, semantic: Option<f64>) -> f64 {
        let normalized = (graph.unwrap_or(0.0) / self.graph_normalizer).min(1.0);
        self.graph * normalized + self.semantic * semantic.unwrap_or(0.0)
    }
}

impl From<&RecommendConfig> for RecommendWeights {
    fn from(cfg: &RecommendConfig) -> Self {
        Self {
            author: cfg.author_weight,
            ecosystem: cfg.ecosystem_weight,
            collection: cfg.collection_weight,
            graph: cfg.graph_weight,
            semantic: cfg.semantic_weight,
            graph_normalizer: cfg.graph_normalizer,
        }
    }
}

impl Default for RecommendWeights {
    fn default() -> Self {
        Self::from(&RecommendConfig::default())
    }
}

/// Sorts by score and greedily accepts at most `max_per_owner` per owner.
pub fn select_diverse(
    mut candidates: Vec<ScoredCandidate>,
    limit: usize,
    max_per_owner: usize,
) -> Vec<ScoredCandidate> {
    candidates.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.full_name.cmp(&b.full_name))
    });
    let mut per_owner: HashMap<String, usize> = HashMap::new();
    let mut selected = Vec::with_capacity(limit.min(candidates.len()));
    for candidate in candidates {
        if selected.len() >= limit {
            break;
        }
        let count = per_owner.entry(candidate.owner().to_string()).or_insert(0);
        if *count >= max_per_owner {
            continue;
        }
        *count += 1;
        selected.push(candidate);
    }
    selected
}

pub struct Recommender {
    store: Store,
    index: Option<Arc<dyn VectorIndex>>,
    weights: RecommendWeights,
    max_per_owner: usize,
    semantic_candidates: usize,
    graph_candidates: usize,
    timeout: Duration,
}

impl Recommender {
    pub fn new(
        store: Store,
        index: Option<Arc<dyn VectorIndex>>,
        cfg: &RecommendConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            index,
            weights: RecommendWeights::from(cfg),
            max_per_owner: cfg.max_per_owner,
            semantic_candidates: cfg.semantic_candidates,
            graph_candidates: cfg.graph_candidates,
            timeout,
        }
    }

    pub async fn recommend(
        &self,
        full_name: &str,
        limit: usize,
        include_semantic: bool,
        exclude: &HashSet<String>,
    ) -> Result<Vec<Recommendation>> {
        if limit == 0 {
            return Err(CoreError::InvalidArgument("limit must be positive".into()));
        }
        let target = self.store.get_repository(full_name).await?;
        if target.map_or(true, |r| r.deleted_at.is_some()) {
            return Err(CoreError::NotFound(full_name.to_string()));
        }
        let mut candidates: HashMap<String, ScoredCandidate> = HashMap::new();

        let edges = self
            .store
            .get_edges(full_name, &GRAPH_TYPES, self.graph_candidates)
            .await?;
        for edge in edges {
            let candidate = candidates
                .entry(edge.target.clone())
                .or_insert_with(|| ScoredCandidate::new(edge.target.clone()));
            let contribution = edge.weight * self.weights.type_weight(edge.edge_type);
            candidate.graph_score = Some(candidate.graph_score.unwrap_or(0.0) + contribution);
            candidate.add_source(edge.edge_type.as_str());
        }

        if include_semantic {
            if let Some(index) = &self.index {
                let neighbours = with_timeout(
                    "nearest neighbours",
                    self.timeout,
                    index.nearest_neighbors(full_name, self.semantic_candidates),
                )
                .await;
                match neighbours {
                    Ok(hits) => {
                        for hit in hits {
                            let candidate = candidates
                                .entry(hit.full_name.clone())
                                .or_insert_with(|| ScoredCandidate::new(hit.full_name.clone()));
                            candidate.record(Signal::Semantic, hit.score);
                            candidate.add_source("semantic");
                        }
                    }
                    Err(e) => warn!(repo = %full_name, "semantic recall failed: {e}"),
                }
            }
        }

        let pool: Vec<ScoredCandidate> = candidates
            .into_values()
            .filter(|c| c.full_name != full_name && !exclude.contains(&c.full_name))
            .map(|mut c| {
                c.final_score = self.weights.fuse(c.graph_score, c.semantic_score);
                c
            })
            .collect();
        debug!(repo = %full_name, candidates = pool.len(), "fusing recommendations");
        Ok(select_diverse(pool, limit, self.max_per_owner)
            .into_iter()
            .map(Recommendation::from)
            .collect())
    }
}
