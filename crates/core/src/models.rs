use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use providers::github::RemoteRepository;
pub use storage::models::{
    AnalysisFields, Edge, EdgeFilter, EdgeType, Repository, RepositoryFilter, RepositoryPatch,
    SyncRun,
};

/// Validated `owner/name` identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoName {
    full_name: String,
    split: usize,
}

impl RepoName {
    pub fn owner(&self) -> &str {
        &self.full_name[..self.split]
    }

    pub fn name(&self) -> &str {
        &self.full_name[self.split + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.full_name
    }
}

impl FromStr for RepoName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.find('/') {
            Some(split)
                if split > 0
                    && split + 1 < trimmed.len()
                    && !trimmed[split + 1..].contains('/') =>
            {
                Ok(RepoName {
                    full_name: trimmed.to_string(),
                    split,
                })
            }
            _ => Err(CoreError::InvalidArgument(format!(
                "repository identity must look like owner/name, got {s:?}"
            ))),
        }
    }
}

impl TryFrom<String> for RepoName {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RepoName> for String {
    fn from(name: RepoName) -> Self {
        name.full_name
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name)
    }
}

/// Owner segment of a full name, or the whole string when it has no separator.
pub fn owner_of(full_name: &str) -> &str {
    full_name.split('/').next().unwrap_or(full_name)
}

/// Retrieval signal that contributed to a fused score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Keyword,
    Semantic,
    Graph,
}

/// Transient per-node fusion state shared by search and recommendation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub full_name: String,
    pub keyword_score: Option<f64>,
    pub semantic_score: Option<f64>,
    pub graph_score: Option<f64>,
    pub final_score: f64,
    pub sources: Vec<String>,
}

impl ScoredCandidate {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            ..Self::default()
        }
    }

    pub fn owner(&self) -> &str {
        owner_of(&self.full_name)
    }

    pub fn add_source(&mut self, source: &str) {
        if !self.sources.iter().any(|s| s == source) {
            self.sources.push(source.to_string());
        }
    }

    /// Keeps the best score seen for a signal.
    pub fn record(&mut self, signal: Signal, score: f64) {
        let slot = match signal {
            Signal::Keyword => &mut self.keyword_score,
            Signal::Semantic => &mut self.semantic_score,
            Signal::Graph => &mut self.graph_score,
        };
        *slot = Some(slot.map_or(score, |prev| prev.max(score)));
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
