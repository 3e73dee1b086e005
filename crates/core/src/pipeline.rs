//! Process context: one explicitly constructed owner of every service.

use crate::analysis::Analyzer;
use crate::config::AppConfig;
use crate::error::Result;
use crate::graph::GraphBuilder;
use crate::indexer::IndexWorker;
use crate::recommend::Recommender;
use crate::scheduler::SyncScheduler;
use crate::search::{FusionWeights, SearchEngine};
use crate::semantic::SemanticEdgeDiscovery;
use crate::similarity::SimilarityGraph;
use crate::sync::{SyncEngine, SyncOptions};
use crate::synonyms::{DictionaryExpander, SynonymExpander};
use crate::vectorstore::{QdrantIndex, VectorIndex};
use anyhow::Context;
use providers::github::{GithubClient, GithubConfig, StarSource};
use providers::noop::NoopProvider;
use providers::openai::{OpenAiConfig, OpenAiProvider};
use providers::qdrant::{QdrantClient, QdrantConfig};
use providers::ProviderRegistry;
use std::sync::Arc;
use std::time::Duration;
use storage::Store;
use tracing::{info, warn};

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Remote collaborators; tests substitute in-process fakes.
pub struct Collaborators {
    pub source: Arc<dyn StarSource>,
    pub index: Option<Arc<dyn VectorIndex>>,
    pub registry: ProviderRegistry,
    pub expander: Arc<dyn SynonymExpander>,
}

pub struct AppContext {
    pub config: AppConfig,
    pub store: Store,
    pub index: Option<Arc<dyn VectorIndex>>,
    pub worker: Arc<IndexWorker>,
    pub graph: GraphBuilder,
    pub search: SearchEngine,
    pub recommender: Recommender,
    pub sync: Arc<SyncEngine>,
    pub similarity: SimilarityGraph,
    pub scheduler: SyncScheduler,
}

impl AppContext {
    /// Opens the database and builds collaborators from configuration and
    /// environment.
    pub async fn open(config: AppConfig) -> anyhow::Result<Self> {
        let store = storage::open(&config.database.path)
            .await
            .context("db open")?;
        let registry = build_registry(&config);
        let collaborators = Collaborators {
            source: build_star_source(&config),
            index: build_vector_index(&config, &registry),
            expander: build_expander(&config)?,
            registry,
        };
        Ok(Self::assemble(config, store, collaborators))
    }

    /// Wires services around an opened store. Spawns the index worker, so it
    /// must run inside a tokio runtime.
    pub fn assemble(config: AppConfig, store: Store, collaborators: Collaborators) -> Self {
        let Collaborators {
            source,
            index,
            registry,
            expander,
        } = collaborators;
        let vector_timeout = Duration::from_secs(config.vectors.timeout_secs);
        let semantic = index.clone().map(|index| {
            Arc::new(SemanticEdgeDiscovery::new(
                store.clone(),
                index,
                vector_timeout,
                config.graph.mirror_edges,
            ))
        });
        let worker = Arc::new(IndexWorker::spawn(
            store.clone(),
            index.clone(),
            semantic.clone(),
            &config.graph,
            vector_timeout,
            config.sync.worker_queue,
        ));
        let graph = GraphBuilder::new(store.clone(), semantic, &config.graph);
        let search = SearchEngine::new(
            store.clone(),
            index.clone(),
            expander,
            FusionWeights {
                fts: config.search.fts_weight,
                semantic: config.search.semantic_weight,
            },
            config.search.max_expansions,
            vector_timeout,
        );
        let recommender = Recommender::new(
            store.clone(),
            index.clone(),
            &config.recommend,
            vector_timeout,
        );
        let analyzer = Analyzer::new(
            registry,
            config.llm.provider.clone(),
            Duration::from_secs(config.llm.timeout_secs),
        );
        let sync = Arc::new(SyncEngine::new(
            store.clone(),
            source,
            analyzer,
            index.clone(),
            worker.clone(),
            config.sync.clone(),
            &config.graph,
            vector_timeout,
        ));
        let scheduler = SyncScheduler::new(sync.clone(), SyncOptions::default());
        let similarity = SimilarityGraph::new(
            store.clone(),
            index.clone(),
            vector_timeout,
            config.similarity.cache_ttl_secs,
        );
        Self {
            config,
            store,
            index,
            worker,
            graph,
            search,
            recommender,
            sync,
            similarity,
            scheduler,
        }
    }

    /// Stops the scheduler and drains the index worker.
    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.stop().await?;
        self.worker.shutdown().await?;
        info!("context shut down");
        Ok(())
    }
}

pub fn build_registry(config: &AppConfig) -> ProviderRegistry {
    let mut reg = ProviderRegistry::new().with_embedding("noop", Arc::new(NoopProvider));

    if let Some(key) = std::env::var_os("OPENAI_API_KEY") {
        let base = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string());
        let provider = OpenAiProvider::new(OpenAiConfig {
            api_key: key.to_string_lossy().into_owned(),
            base_url: base,
            embedding_model: config.embeddings.model.clone(),
            chat_model: config.llm.chat_model.clone(),
        });
        reg = reg
            .with_embedding("openai", Arc::new(provider.clone()))
            .with_llm("openai", Arc::new(provider));
    }

    if let Some(llm) = &config.llm.provider {
        reg = reg.set_preferred_llm(llm);
    }
    reg.set_preferred_embedding(&config.embeddings.provider)
}

pub fn build_vector_index(
    config: &AppConfig,
    registry: &ProviderRegistry,
) -> Option<Arc<dyn VectorIndex>> {
    match config.vectors.provider.as_str() {
        "qdrant" => {
            let Some(url) = &config.vectors.url else {
                warn!("qdrant selected without vectors.url, vector features disabled");
                return None;
            };
            let client = QdrantClient::new(QdrantConfig {
                url: url.clone(),
                collection: config.vectors.collection.clone(),
                api_key: std::env::var("QDRANT_API_KEY").ok(),
            });
            let index: Arc<dyn VectorIndex> = Arc::new(QdrantIndex::new(
                client,
                registry.clone(),
                config.embeddings.batch_size,
            ));
            Some(index)
        }
        "none" => None,
        other => {
            warn!(provider = other, "unknown vector provider, vector features disabled");
            None
        }
    }
}

pub fn build_star_source(config: &AppConfig) -> Arc<dyn StarSource> {
    Arc::new(GithubClient::new(GithubConfig {
        api_url: config.github.api_url.clone(),
        token: std::env::var("GITHUB_TOKEN").ok(),
        user: config.github.user.clone(),
    }))
}

pub fn build_expander(config: &AppConfig) -> anyhow::Result<Arc<dyn SynonymExpander>> {
    let expander = match &config.search.synonyms_path {
        Some(path) => DictionaryExpander::from_file(std::path::Path::new(path))
            .with_context(|| format!("load synonyms from {path}"))?,
        None => DictionaryExpander::builtin(),
    };
    let expander: Arc<dyn SynonymExpander> = Arc::new(expander);
    Ok(expander)
}
