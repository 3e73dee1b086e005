use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A starred repository as persisted locally. Identity is `full_name` (`owner/name`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub full_name: String,
    pub owner: String,
    pub name: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub language: Option<String>,
    /// Byte counts per language. `None` means the breakdown was never fetched.
    pub languages: Option<BTreeMap<String, u64>>,
    pub topics: Vec<String>,
    pub stars: i64,
    pub forks: i64,
    pub pushed_at: Option<String>,
    pub archived: bool,
    pub visibility: Option<String>,
    pub owner_type: Option<String>,
    pub starred_at: Option<String>,
    pub summary: Option<String>,
    pub categories: Vec<String>,
    pub features: Vec<String>,
    pub use_cases: Vec<String>,
    pub analyzed_at: Option<i64>,
    pub deleted_at: Option<i64>,
}

impl Repository {
    pub fn has_analysis(&self) -> bool {
        self.analyzed_at.is_some()
    }

    pub fn analysis(&self) -> AnalysisFields {
        AnalysisFields {
            summary: self.summary.clone(),
            categories: self.categories.clone(),
            features: self.features.clone(),
            use_cases: self.use_cases.clone(),
            analyzed_at: self.analyzed_at,
        }
    }

    pub fn set_analysis(&mut self, analysis: AnalysisFields) {
        self.summary = analysis.summary;
        self.categories = analysis.categories;
        self.features = analysis.features;
        self.use_cases = analysis.use_cases;
        self.analyzed_at = analysis.analyzed_at;
    }
}

/// Fields derived from LLM analysis; preserved across metadata refreshes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFields {
    pub summary: Option<String>,
    pub categories: Vec<String>,
    pub features: Vec<String>,
    pub use_cases: Vec<String>,
    pub analyzed_at: Option<i64>,
}

/// Partial update of the cheap metadata columns.
#[derive(Debug, Clone, Default)]
pub struct RepositoryPatch {
    pub stars: Option<i64>,
    pub forks: Option<i64>,
    pub description: Option<Option<String>>,
    pub language: Option<Option<String>>,
    pub archived: Option<bool>,
    pub visibility: Option<Option<String>>,
    pub owner_type: Option<Option<String>>,
}

impl RepositoryPatch {
    pub fn is_empty(&self) -> bool {
        self.stars.is_none()
            && self.forks.is_none()
            && self.description.is_none()
            && self.language.is_none()
            && self.archived.is_none()
            && self.visibility.is_none()
            && self.owner_type.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RepositoryFilter {
    pub owner: Option<String>,
    pub language: Option<String>,
    pub min_stars: Option<i64>,
    pub include_archived: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, FromRow)]
pub(crate) struct RepositoryRow {
    pub full_name: String,
    pub owner: String,
    pub name: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub language: Option<String>,
    pub languages_json: Option<String>,
    pub topics_json: String,
    pub stars: i64,
    pub forks: i64,
    pub pushed_at: Option<String>,
    pub archived: bool,
    pub visibility: Option<String>,
    pub owner_type: Option<String>,
    pub starred_at: Option<String>,
    pub summary: Option<String>,
    pub categories_json: String,
    pub features_json: String,
    pub use_cases_json: String,
    pub analyzed_at: Option<i64>,
    pub deleted_at: Option<i64>,
}

fn json_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

impl From<RepositoryRow> for Repository {
    fn from(row: RepositoryRow) -> Self {
        Repository {
            languages: row
                .languages_json
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok()),
            topics: json_list(&row.topics_json),
            categories: json_list(&row.categories_json),
            features: json_list(&row.features_json),
            use_cases: json_list(&row.use_cases_json),
            full_name: row.full_name,
            owner: row.owner,
            name: row.name,
            description: row.description,
            url: row.url,
            language: row.language,
            stars: row.stars,
            forks: row.forks,
            pushed_at: row.pushed_at,
            archived: row.archived,
            visibility: row.visibility,
            owner_type: row.owner_type,
            starred_at: row.starred_at,
            summary: row.summary,
            analyzed_at: row.analyzed_at,
            deleted_at: row.deleted_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Author,
    Ecosystem,
    Collection,
    Semantic,
}

impl EdgeType {
    pub const ALL: [EdgeType; 4] = [
        EdgeType::Author,
        EdgeType::Ecosystem,
        EdgeType::Collection,
        EdgeType::Semantic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Author => "author",
            EdgeType::Ecosystem => "ecosystem",
            EdgeType::Collection => "collection",
            EdgeType::Semantic => "semantic",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown edge type: {0}")]
pub struct UnknownEdgeType(pub String);

impl FromStr for EdgeType {
    type Err = UnknownEdgeType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "author" => Ok(EdgeType::Author),
            "ecosystem" => Ok(EdgeType::Ecosystem),
            "collection" => Ok(EdgeType::Collection),
            "semantic" => Ok(EdgeType::Semantic),
            other => Err(UnknownEdgeType(other.to_string())),
        }
    }
}

/// Directed, typed relationship between two repositories. Lookups go by `source`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub edge_type: EdgeType,
    pub weight: f64,
    pub metadata: serde_json::Value,
}

impl Edge {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        edge_type: EdgeType,
        weight: f64,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            edge_type,
            weight,
            metadata,
        }
    }

    pub fn mirrored(&self) -> Self {
        Self {
            source: self.target.clone(),
            target: self.source.clone(),
            edge_type: self.edge_type,
            weight: self.weight,
            metadata: self.metadata.clone(),
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct EdgeRow {
    pub source: String,
    pub target: String,
    pub edge_type: String,
    pub weight: f64,
    pub metadata_json: String,
}

impl TryFrom<EdgeRow> for Edge {
    type Error = UnknownEdgeType;

    fn try_from(row: EdgeRow) -> Result<Self, Self::Error> {
        Ok(Edge {
            edge_type: row.edge_type.parse()?,
            source: row.source,
            target: row.target,
            weight: row.weight,
            metadata: serde_json::from_str(&row.metadata_json)
                .unwrap_or_else(|_| serde_json::json!({})),
        })
    }
}

/// Which edges a delete touches.
#[derive(Debug, Clone)]
pub enum EdgeFilter {
    OfType(EdgeType),
    /// Edges of `edge_type` with `node` as source or target.
    Touching { edge_type: EdgeType, node: String },
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CollectionPair {
    pub source: String,
    pub target: String,
    pub collection: String,
}

/// Append-only sync run record, written once when the run finishes.
#[derive(Debug, Clone, Default, FromRow, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: i64,
    pub kind: String,
    pub status: String,
    pub started_at: i64,
    pub completed_at: i64,
    pub total: i64,
    pub added: i64,
    pub updated: i64,
    pub unchanged: i64,
    pub deleted: i64,
    pub failed: i64,
    pub error_text: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct SimilarityCacheRow {
    pub top_n: i64,
    pub k: i64,
    pub payload: String,
    pub built_at: i64,
}
