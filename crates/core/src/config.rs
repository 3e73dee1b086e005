use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub github: GithubSettings,
    pub embeddings: EmbeddingConfig,
    pub vectors: VectorConfig,
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub recommend: RecommendConfig,
    pub sync: SyncConfig,
    pub graph: GraphConfig,
    pub similarity: SimilarityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/stargraph.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubSettings {
    pub api_url: String,
    pub user: Option<String>,
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            user: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "noop".to_string(),
            model: "text-embedding-3-small".to_string(),
            batch_size: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub provider: String,
    pub url: Option<String>,
    pub collection: String,
    pub timeout_secs: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            provider: "none".to_string(),
            url: None,
            collection: "starred_repos".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Option<String>,
    pub chat_model: String,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: None,
            chat_model: "gpt-4o-mini".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub fts_weight: f64,
    pub semantic_weight: f64,
    pub max_expansions: usize,
    pub synonyms_path: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            fts_weight: 0.3,
            semantic_weight: 0.7,
            max_expansions: 3,
            synonyms_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendConfig {
    pub author_weight: f64,
    pub ecosystem_weight: f64,
    pub collection_weight: f64,
    pub graph_weight: f64,
    pub semantic_weight: f64,
    pub graph_normalizer: f64,
    pub max_per_owner: usize,
    pub semantic_candidates: usize,
    pub graph_candidates: usize,
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            author_weight: 1.0,
            ecosystem_weight: 0.5,
            collection_weight: 0.5,
            graph_weight: 0.65,
            semantic_weight: 0.35,
            graph_normalizer: 2.0,
            max_per_owner: 2,
            semantic_candidates: 20,
            graph_candidates: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    Hard,
    Soft,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub skip_analysis: bool,
    pub fetch_readme: bool,
    pub delete_mode: DeleteMode,
    pub interval_secs: u64,
    pub worker_queue: usize,
    pub error_text_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            skip_analysis: false,
            fetch_readme: true,
            delete_mode: DeleteMode::Hard,
            interval_secs: 6 * 60 * 60,
            worker_queue: 256,
            error_text_limit: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Also store the reverse direction of every discovered pair.
    pub mirror_edges: bool,
    pub semantic_top_k: usize,
    pub semantic_min_similarity: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            mirror_edges: false,
            semantic_top_k: 10,
            semantic_min_similarity: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    pub top_n: usize,
    pub k: usize,
    pub cache_ttl_secs: i64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            top_n: 100,
            k: 5,
            cache_ttl_secs: 3600,
        }
    }
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("STARGRAPH")
            .separator("__")
            .try_parsing(true),
    );
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}
