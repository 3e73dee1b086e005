#![allow(dead_code)]

use providers::github::{RemoteRepository, StarSource};
use providers::{AnalysisRequest, AnalysisResponse, LlmProvider, ProviderError, ProviderRegistry};
use stargraph_core::config::AppConfig;
use stargraph_core::synonyms::DictionaryExpander;
use stargraph_core::vectorstore::{VectorHit, VectorIndex};
use stargraph_core::{AppContext, Collaborators};
use stargraph_core::models::Repository;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use storage::Store;

/// Shared-cache in-memory database, unique per test.
pub async fn memory_store(name: &str) -> Store {
    let url = format!("sqlite://file:{name}?mode=memory&cache=shared");
    storage::open(&url).await.unwrap()
}

pub fn remote(full_name: &str, language: &str, topics: &[&str], stars: i64) -> RemoteRepository {
    let (owner, name) = full_name.split_once('/').unwrap();
    RemoteRepository {
        full_name: full_name.to_string(),
        owner: owner.to_string(),
        name: name.to_string(),
        description: Some(format!("{name} written in {language}")),
        url: Some(format!("https://github.com/{full_name}")),
        language: Some(language.to_string()),
        topics: topics.iter().map(|t| t.to_string()).collect(),
        stars,
        forks: 1,
        pushed_at: Some("2024-01-01T00:00:00Z".to_string()),
        archived: false,
        visibility: Some("public".to_string()),
        owner_type: Some("User".to_string()),
        starred_at: Some("2024-02-01T00:00:00Z".to_string()),
    }
}

pub fn stored(full_name: &str, language: &str, topics: &[&str], stars: i64) -> Repository {
    let r = remote(full_name, language, topics, stars);
    Repository {
        full_name: r.full_name,
        owner: r.owner,
        name: r.name,
        description: r.description,
        url: r.url,
        language: r.language,
        languages: Some(BTreeMap::from([(language.to_string(), 1000)])),
        topics: r.topics,
        stars: r.stars,
        forks: r.forks,
        pushed_at: r.pushed_at,
        visibility: r.visibility,
        owner_type: r.owner_type,
        ..Repository::default()
    }
}

#[derive(Default)]
pub struct FakeSource {
    pub starred: Mutex<Vec<RemoteRepository>>,
    pub unavailable: AtomicBool,
    pub broken: Mutex<HashSet<String>>,
    pub language_calls: AtomicUsize,
}

impl FakeSource {
    pub fn with(starred: Vec<RemoteRepository>) -> Self {
        Self {
            starred: Mutex::new(starred),
            ..Self::default()
        }
    }

    pub fn set(&self, starred: Vec<RemoteRepository>) {
        *self.starred.lock().unwrap() = starred;
    }

    pub fn break_repo(&self, full_name: &str) {
        self.broken.lock().unwrap().insert(full_name.to_string());
    }
}

#[async_trait::async_trait]
impl StarSource for FakeSource {
    async fn fetch_starred(&self) -> Result<Vec<RemoteRepository>, ProviderError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProviderError::RequestFailed("connection refused".into()));
        }
        Ok(self.starred.lock().unwrap().clone())
    }

    async fn fetch_languages(
        &self,
        full_name: &str,
    ) -> Result<BTreeMap<String, u64>, ProviderError> {
        self.language_calls.fetch_add(1, Ordering::SeqCst);
        if self.broken.lock().unwrap().contains(full_name) {
            return Err(ProviderError::RequestFailed(format!("500 for {full_name}")));
        }
        let language = self
            .starred
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.full_name == full_name)
            .and_then(|r| r.language.clone())
            .unwrap_or_else(|| "Text".to_string());
        Ok(BTreeMap::from([(language, 1000)]))
    }

    async fn fetch_readme(&self, full_name: &str) -> Result<Option<String>, ProviderError> {
        Ok(Some(format!("# {full_name}")))
    }
}

/// Vector index with scripted answers.
#[derive(Default)]
pub struct FakeIndex {
    pub search_hits: Mutex<Vec<VectorHit>>,
    pub neighbours: Mutex<HashMap<String, Vec<VectorHit>>>,
    pub upserted: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
    pub failing: AtomicBool,
    pub broken: Mutex<HashSet<String>>,
}

pub fn hit(full_name: &str, score: f64) -> VectorHit {
    VectorHit {
        full_name: full_name.to_string(),
        score,
    }
}

impl FakeIndex {
    pub fn with_search(hits: Vec<VectorHit>) -> Self {
        Self {
            search_hits: Mutex::new(hits),
            ..Self::default()
        }
    }

    pub fn set_neighbours(&self, full_name: &str, hits: Vec<VectorHit>) {
        self.neighbours
            .lock()
            .unwrap()
            .insert(full_name.to_string(), hits);
    }

    /// Makes neighbour lookups for one repository fail.
    pub fn break_node(&self, full_name: &str) {
        self.broken.lock().unwrap().insert(full_name.to_string());
    }

    fn check(&self) -> stargraph_core::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(stargraph_core::CoreError::Remote("vector index down".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl VectorIndex for FakeIndex {
    async fn search(&self, _query: &str, top_k: usize) -> stargraph_core::Result<Vec<VectorHit>> {
        self.check()?;
        let mut hits = self.search_hits.lock().unwrap().clone();
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn nearest_neighbors(
        &self,
        full_name: &str,
        top_k: usize,
    ) -> stargraph_core::Result<Vec<VectorHit>> {
        self.check()?;
        if self.broken.lock().unwrap().contains(full_name) {
            return Err(stargraph_core::CoreError::Remote(format!(
                "no neighbours for {full_name}"
            )));
        }
        let mut hits = self
            .neighbours
            .lock()
            .unwrap()
            .get(full_name)
            .cloned()
            .unwrap_or_default();
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn upsert(&self, repos: &[Repository]) -> stargraph_core::Result<()> {
        self.check()?;
        let mut upserted = self.upserted.lock().unwrap();
        upserted.extend(repos.iter().map(|r| r.full_name.clone()));
        Ok(())
    }

    async fn remove(&self, full_name: &str) -> stargraph_core::Result<()> {
        self.check()?;
        self.removed.lock().unwrap().push(full_name.to_string());
        Ok(())
    }
}

/// Analysis answering with a fixed category set.
#[derive(Default)]
pub struct FakeLlm {
    pub calls: AtomicUsize,
}

#[async_trait::async_trait]
impl LlmProvider for FakeLlm {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AnalysisResponse {
            summary: format!("Summary of {}", request.full_name),
            categories: vec!["developer-tools".to_string()],
            features: vec!["fast".to_string()],
            use_cases: vec!["automation".to_string()],
        })
    }
}

pub struct Harness {
    pub ctx: AppContext,
    pub source: Arc<FakeSource>,
    pub index: Option<Arc<FakeIndex>>,
    pub llm: Arc<FakeLlm>,
}

pub async fn harness(
    name: &str,
    config: AppConfig,
    source: FakeSource,
    index: Option<FakeIndex>,
) -> Harness {
    let store = memory_store(name).await;
    let source = Arc::new(source);
    let index = index.map(Arc::new);
    let llm = Arc::new(FakeLlm::default());
    let registry = ProviderRegistry::new()
        .with_llm("fake", llm.clone())
        .set_preferred_llm("fake");
    let dyn_index: Option<Arc<dyn VectorIndex>> = index
        .clone()
        .map(|i| -> Arc<dyn VectorIndex> { i });
    let ctx = AppContext::assemble(
        config,
        store,
        Collaborators {
            source: source.clone(),
            index: dyn_index,
            registry,
            expander: Arc::new(DictionaryExpander::builtin()),
        },
    );
    Harness {
        ctx,
        source,
        index,
        llm,
    }
}
