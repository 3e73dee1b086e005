//! Hybrid retrieval: keyword and vector signals fused into one ranking.

use crate::error::{with_timeout, CoreError, Result};
use crate::models::{owner_of, round_to, Repository, ScoredCandidate, Signal};
use crate::synonyms::SynonymExpander;
use crate::vectorstore::{VectorHit, VectorIndex};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use storage::{KeywordHit, Store};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub fts: f64,
    pub semantic: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            fts: 0.3,
            semantic: 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Keyword,
    Semantic,
    Hybrid,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub full_name: String,
    pub owner: String,
    pub name: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub stars: i64,
    pub topics: Vec<String>,
    pub categories: Vec<String>,
    pub summary: Option<String>,
    pub keyword_score: f64,
    pub semantic_score: f64,
    pub final_score: f64,
    pub match_type: MatchType,
}

/// Squashes an FTS5 `bm25()` rank (more negative is better) into [0, 1].
pub fn keyword_score(rank: f64) -> f64 {
    let relevance = -rank;
    1.0 / (1.0 + (-relevance / 10.0).exp())
}

pub fn match_type(candidate: &ScoredCandidate) -> MatchType {
    match (candidate.keyword_score, candidate.semantic_score) {
        (Some(_), Some(_)) => MatchType::Hybrid,
        (None, Some(_)) => MatchType::Semantic,
        _ => MatchType::Keyword,
    }
}

/// Running per-identity accumulation of keyword and vector signals.
#[derive(Debug, Default)]
pub struct FusionAccumulator {
    candidates: HashMap<String, ScoredCandidate>,
    repositories: HashMap<String, Repository>,
}

impl FusionAccumulator {
    pub fn add_keyword_hits(&mut self, hits: Vec<KeywordHit>) {
        for hit in hits {
            let name = hit.repository.full_name.clone();
            let candidate = self
                .candidates
                .entry(name.clone())
                .or_insert_with(|| ScoredCandidate::new(name.clone()));
            candidate.record(Signal::Keyword, keyword_score(hit.rank));
            candidate.add_source("keyword");
            self.repositories.entry(name).or_insert(hit.repository);
        }
    }

    pub fn add_vector_hits(&mut self, hits: Vec<VectorHit>) {
        for hit in hits {
            let candidate = self
                .candidates
                .entry(hit.full_name.clone())
                .or_insert_with(|| ScoredCandidate::new(hit.full_name.clone()));
            candidate.record(Signal::Semantic, hit.score.clamp(0.0, 1.0));
            candidate.add_source("semantic");
        }
    }

    /// Scores, sorts descending and keeps the best `top_k`.
    pub fn rank(self, weights: FusionWeights, top_k: usize) -> (Vec<ScoredCandidate>, HashMap<String, Repository>) {
        let mut ranked: Vec<ScoredCandidate> = self
            .candidates
            .into_values()
            .map(|mut c| {
                c.final_score = weights.fts * c.keyword_score.unwrap_or(0.0)
                    + weights.semantic * c.semantic_score.unwrap_or(0.0);
                c
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.full_name.cmp(&b.full_name))
        });
        ranked.truncate(top_k);
        (ranked, self.repositories)
    }
}

pub struct SearchEngine {
    store: Store,
    index: Option<Arc<dyn VectorIndex>>,
    expander: Arc<dyn SynonymExpander>,
    weights: FusionWeights,
    max_expansions: usize,
    timeout: Duration,
}

impl SearchEngine {
    pub fn new(
        store: Store,
        index: Option<Arc<dyn VectorIndex>>,
        expander: Arc<dyn SynonymExpander>,
        weights: FusionWeights,
        max_expansions: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            index,
            expander,
            weights,
            max_expansions,
            timeout,
        }
    }

    async fn keyword_branch(&self, query: &str, limit: usize) -> Vec<KeywordHit> {
        match self.store.search_by_keyword(query, limit).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(query, "keyword lookup failed: {e:#}");
                Vec::new()
            }
        }
    }

    async fn vector_branch(&self, query: &str, limit: usize) -> Vec<VectorHit> {
        let Some(index) = &self.index else {
            return Vec::new();
        };
        match with_timeout("vector search", self.timeout, index.search(query, limit)).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(query, "vector lookup failed: {e}");
                Vec::new()
            }
        }
    }

    /// Hybrid search over every expansion of `query`.
    ///
    /// `override_keywords` replaces the text sent to the keyword index for
    /// every expansion. A failing signal contributes nothing; if all fail the
    /// result is empty.
    pub async fn search(
        &self,
        query: &str,
        override_keywords: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Err(CoreError::InvalidArgument("top_k must be positive".into()));
        }
        let expansions = self.expander.expand(query, self.max_expansions);
        let per_signal = top_k.saturating_mul(2);
        let mut acc = FusionAccumulator::default();
        for expanded in expansions.iter().filter(|q| !q.trim().is_empty()) {
            let keyword_text = override_keywords.unwrap_or(expanded);
            let (keyword_hits, vector_hits) = tokio::join!(
                self.keyword_branch(keyword_text, per_signal),
                self.vector_branch(expanded, per_signal)
            );
            debug!(
                query = %expanded,
                keyword = keyword_hits.len(),
                vector = vector_hits.len(),
                "expansion searched"
            );
            acc.add_keyword_hits(keyword_hits);
            acc.add_vector_hits(vector_hits);
        }
        let (ranked, known) = acc.rank(self.weights, top_k);
        self.enrich(ranked, known).await
    }

    /// Fills denormalised fields for vector-only matches with one batched lookup.
    async fn enrich(
        &self,
        ranked: Vec<ScoredCandidate>,
        mut known: HashMap<String, Repository>,
    ) -> Result<Vec<SearchResult>> {
        let missing: Vec<String> = ranked
            .iter()
            .filter(|c| !known.contains_key(&c.full_name))
            .map(|c| c.full_name.clone())
            .collect();
        if !missing.is_empty() {
            match self.store.get_repositories(&missing).await {
                Ok(repos) => {
                    for repo in repos {
                        known.insert(repo.full_name.clone(), repo);
                    }
                }
                Err(e) => warn!("result enrichment failed: {e:#}"),
            }
        }
        Ok(ranked
            .into_iter()
            .map(|c| {
                let repo = known.remove(&c.full_name);
                to_result(c, repo)
            })
            .collect())
    }
}

fn to_result(candidate: ScoredCandidate, repo: Option<Repository>) -> SearchResult {
    let match_type = match_type(&candidate);
    let repo = repo.unwrap_or_else(|| Repository {
        owner: owner_of(&candidate.full_name).to_string(),
        name: candidate
            .full_name
            .split_once('/')
            .map(|(_, n)| n.to_string())
            .unwrap_or_default(),
        ..Repository::default()
    });
    SearchResult {
        full_name: candidate.full_name,
        owner: repo.owner,
        name: repo.name,
        description: repo.description,
        language: repo.language,
        stars: repo.stars,
        topics: repo.topics,
        categories: repo.categories,
        summary: repo.summary,
        keyword_score: candidate.keyword_score.unwrap_or(0.0),
        semantic_score: candidate.semantic_score.unwrap_or(0.0),
        final_score: round_to(candidate.final_score, 3),
        match_type,
    }
}
