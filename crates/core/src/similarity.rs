//! Similarity network over the most-starred repositories, cached as one row.

use crate::error::{with_timeout, CoreError, Result};
use crate::graph::jaccard;
use crate::models::{round_to, Repository};
use crate::vectorstore::{VectorHit, VectorIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use storage::models::SimilarityCacheRow;
use storage::Store;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const MAX_TOP_N: usize = 500;
/// Window of neighbours consulted for the semantic approximation.
const SEMANTIC_WINDOW: usize = 10;

const COLD: (u8, u8, u8) = (59, 130, 246);
const HOT: (u8, u8, u8) = (239, 68, 68);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkNode {
    pub id: String,
    pub owner: String,
    pub stars: i64,
    pub language: Option<String>,
    pub categories: Vec<String>,
    pub color: String,
    pub size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEdge {
    pub source: String,
    pub target: String,
    pub strength: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub nodes: Vec<NetworkNode>,
    pub edges: Vec<NetworkEdge>,
    pub top_n: usize,
    pub k: usize,
    pub built_at: i64,
}

/// Jaccard over category sets; zero when either side has none.
pub fn category_similarity(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let a: HashSet<&String> = a.iter().collect();
    let b: HashSet<&String> = b.iter().collect();
    jaccard(&a, &b)
}

/// Even blend when a semantic score exists, category similarity otherwise.
pub fn blend(category: f64, semantic: f64) -> f64 {
    if semantic > 0.0 {
        0.5 * category + 0.5 * semantic
    } else {
        category
    }
}

/// Star count mapped onto a blue-to-red ramp on a log scale.
pub fn heat_color(stars: i64, max_stars: i64) -> String {
    let t = if max_stars <= 0 {
        0.0
    } else {
        ((stars.max(0) as f64).ln_1p() / (max_stars as f64).ln_1p()).clamp(0.0, 1.0)
    };
    let mix = |c: u8, h: u8| (c as f64 + (h as f64 - c as f64) * t).round() as u8;
    format!(
        "#{:02x}{:02x}{:02x}",
        mix(COLD.0, HOT.0),
        mix(COLD.1, HOT.1),
        mix(COLD.2, HOT.2)
    )
}

pub fn node_size(category_count: usize) -> f64 {
    (6.0 + 3.0 * category_count as f64).min(30.0)
}

/// Keeps the `k` strongest positive neighbours per node, then merges the
/// two directions of a pair into one edge with the larger strength.
pub fn strongest_pairs(names: &[String], scores: &[Vec<f64>], k: usize) -> Vec<NetworkEdge> {
    let mut pairs: HashMap<(usize, usize), f64> = HashMap::new();
    for (i, row) in scores.iter().enumerate() {
        let mut ranked: Vec<(usize, f64)> = row
            .iter()
            .copied()
            .enumerate()
            .filter(|(j, s)| *j != i && *s > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        for (j, score) in ranked.into_iter().take(k) {
            let key = (i.min(j), i.max(j));
            let entry = pairs.entry(key).or_insert(score);
            *entry = entry.max(score);
        }
    }
    let mut edges: Vec<NetworkEdge> = pairs
        .into_iter()
        .map(|((a, b), strength)| NetworkEdge {
            source: names[a].clone(),
            target: names[b].clone(),
            strength: round_to(strength, 3),
        })
        .collect();
    edges.sort_by(|a, b| {
        b.strength
            .partial_cmp(&a.strength)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| a.target.cmp(&b.target))
    });
    edges
}

/// Memoised neighbour windows for one build.
struct SemanticLookup<'a> {
    index: Option<&'a Arc<dyn VectorIndex>>,
    timeout: Duration,
    windows: HashMap<String, Vec<VectorHit>>,
}

impl SemanticLookup<'_> {
    /// Score of `a` within `b`'s top neighbours, zero outside the window.
    async fn similarity(&mut self, a: &str, b: &str) -> f64 {
        let Some(index) = self.index else {
            return 0.0;
        };
        if !self.windows.contains_key(b) {
            let hits = match with_timeout(
                "nearest neighbours",
                self.timeout,
                index.nearest_neighbors(b, SEMANTIC_WINDOW),
            )
            .await
            {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(repo = %b, "semantic window unavailable: {e}");
                    Vec::new()
                }
            };
            self.windows.insert(b.to_string(), hits);
        }
        self.windows
            .get(b)
            .and_then(|hits| hits.iter().find(|h| h.full_name == a))
            .map(|h| h.score)
            .unwrap_or(0.0)
    }
}

pub struct SimilarityGraph {
    store: Store,
    index: Option<Arc<dyn VectorIndex>>,
    timeout: Duration,
    cache_ttl_secs: i64,
    lock: Mutex<()>,
}

fn validate(top_n: usize, k: usize) -> Result<()> {
    if top_n == 0 || top_n > MAX_TOP_N {
        return Err(CoreError::InvalidArgument(format!(
            "top_n must be between 1 and {MAX_TOP_N}, got {top_n}"
        )));
    }
    if k == 0 {
        return Err(CoreError::InvalidArgument("k must be positive".into()));
    }
    Ok(())
}

impl SimilarityGraph {
    pub fn new(
        store: Store,
        index: Option<Arc<dyn VectorIndex>>,
        timeout: Duration,
        cache_ttl_secs: i64,
    ) -> Self {
        Self {
            store,
            index,
            timeout,
            cache_ttl_secs,
            lock: Mutex::new(()),
        }
    }

    /// Cached network when fresh and built with the same parameters,
    /// otherwise a rebuild that replaces the cache.
    pub async fn get_network(&self, top_n: usize, k: usize, refresh: bool) -> Result<Network> {
        validate(top_n, k)?;
        let _guard = self.lock.lock().await;
        if !refresh {
            if let Some(network) = self.cached(top_n, k).await? {
                debug!(top_n, k, "similarity network served from cache");
                return Ok(network);
            }
        }
        let network = self.build_network(top_n, k).await?;
        let row = SimilarityCacheRow {
            top_n: top_n as i64,
            k: k as i64,
            payload: serde_json::to_string(&network)?,
            built_at: network.built_at,
        };
        self.store.store_similarity_cache(&row).await?;
        Ok(network)
    }

    async fn cached(&self, top_n: usize, k: usize) -> Result<Option<Network>> {
        let Some(row) = self.store.load_similarity_cache().await? else {
            return Ok(None);
        };
        let age = chrono::Utc::now().timestamp() - row.built_at;
        if row.top_n != top_n as i64 || row.k != k as i64 || age >= self.cache_ttl_secs {
            return Ok(None);
        }
        match serde_json::from_str::<Network>(&row.payload) {
            Ok(network) => Ok(Some(network)),
            Err(e) => {
                warn!("discarding corrupted similarity cache: {e}");
                self.store.clear_similarity_cache().await?;
                Ok(None)
            }
        }
    }

    /// All-pairs similarity over the `top_n` most-starred repositories.
    pub async fn build_network(&self, top_n: usize, k: usize) -> Result<Network> {
        validate(top_n, k)?;
        let repos = self.store.top_by_stars(top_n).await?;
        let mut lookup = SemanticLookup {
            index: self.index.as_ref(),
            timeout: self.timeout,
            windows: HashMap::new(),
        };
        let mut scores = vec![vec![0.0; repos.len()]; repos.len()];
        for (i, a) in repos.iter().enumerate() {
            for (j, b) in repos.iter().enumerate() {
                if i == j {
                    continue;
                }
                let category = category_similarity(&a.categories, &b.categories);
                let semantic = lookup.similarity(&a.full_name, &b.full_name).await;
                scores[i][j] = blend(category, semantic);
            }
        }
        let names: Vec<String> = repos.iter().map(|r| r.full_name.clone()).collect();
        let edges = strongest_pairs(&names, &scores, k);
        let nodes = to_nodes(&repos);
        info!(nodes = nodes.len(), edges = edges.len(), "built similarity network");
        Ok(Network {
            nodes,
            edges,
            top_n,
            k,
            built_at: chrono::Utc::now().timestamp(),
        })
    }
}

fn to_nodes(repos: &[Repository]) -> Vec<NetworkNode> {
    let max_stars = repos.iter().map(|r| r.stars).max().unwrap_or(0);
    repos
        .iter()
        .map(|r| NetworkNode {
            id: r.full_name.clone(),
            owner: r.owner.clone(),
            stars: r.stars,
            language: r.language.clone(),
            categories: r.categories.clone(),
            color: heat_color(r.stars, max_stars),
            size: node_size(r.categories.len()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cats(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn category_similarity_is_jaccard() {
        let a = cats(&["cli", "db", "web"]);
        let b = cats(&["db", "web", "ml", "ops"]);
        assert!((category_similarity(&a, &b) - 0.4).abs() < 1e-12);
        assert_eq!(category_similarity(&a, &[]), 0.0);
    }

    #[test]
    fn blend_falls_back_to_categories() {
        assert_eq!(blend(0.4, 0.0), 0.4);
        assert!((blend(0.4, 0.8) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn heat_ramp_endpoints() {
        assert_eq!(heat_color(0, 1000), "#3b82f6");
        assert_eq!(heat_color(1000, 1000), "#ef4444");
        assert_eq!(heat_color(5, 0), "#3b82f6");
    }

    #[test]
    fn node_size_grows_with_categories() {
        assert!(node_size(3) > node_size(1));
        assert_eq!(node_size(100), 30.0);
    }

    #[test]
    fn pairs_are_deduplicated_and_capped() {
        let names = cats(&["a/1", "a/2", "a/3"]);
        let scores = vec![
            vec![0.0, 0.9, 0.2],
            vec![0.7, 0.0, 0.5],
            vec![0.1, 0.4, 0.0],
        ];
        let edges = strongest_pairs(&names, &scores, 1);
        assert_eq!(
            edges,
            vec![
                NetworkEdge {
                    source: "a/1".into(),
                    target: "a/2".into(),
                    strength: 0.9
                },
                NetworkEdge {
                    source: "a/2".into(),
                    target: "a/3".into(),
                    strength: 0.4
                },
            ]
        );
    }

    #[test]
    fn zero_similarity_produces_no_edge() {
        let names = cats(&["a/1", "a/2"]);
        let scores = vec![vec![0.0, 0.0], vec![0.0, 0.0]];
        assert!(strongest_pairs(&names, &scores, 5).is_empty());
    }

    #[test]
    fn corrupted_payload_does_not_parse() {
        assert!(serde_json::from_str::<Network>("{\"nodes\": [").is_err());
    }

    #[test]
    fn out_of_range_parameters_are_rejected() {
        assert!(validate(0, 5).is_err());
        assert!(validate(MAX_TOP_N + 1, 5).is_err());
        assert!(validate(10, 0).is_err());
        assert!(validate(MAX_TOP_N, 1).is_ok());
    }
}
