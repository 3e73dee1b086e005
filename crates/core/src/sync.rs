//! Reconciles the local store with the remote starred set.

use crate::analysis::Analyzer;
use crate::config::{DeleteMode, GraphConfig, SyncConfig};
use crate::error::{with_timeout, CoreError, Result};
use crate::indexer::{IndexJob, IndexWorker};
use crate::models::{RemoteRepository, RepoName, Repository, RepositoryPatch, SyncRun};
use crate::vectorstore::VectorIndex;
use providers::github::StarSource;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use storage::Store;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeClass {
    None,
    Light,
    Heavy,
}

#[derive(Debug, Clone)]
pub struct ChangeAssessment {
    pub class: ChangeClass,
    /// Set for light changes touching description or primary language.
    pub needs_reanalysis: bool,
    /// Description, language or topics differ; the vector entry is stale.
    pub content_changed: bool,
    /// Columns to write for a light change.
    pub patch: RepositoryPatch,
}

fn changed<T: PartialEq + Clone>(stored: &T, remote: &T) -> Option<T> {
    (stored != remote).then(|| remote.clone())
}

/// Decides how much of a stored record has to be recomputed.
///
/// A differing push timestamp or a missing language breakdown is heavy no
/// matter what else matches. Topics alone do not make a change.
pub fn classify_change(stored: &Repository, remote: &RemoteRepository) -> ChangeAssessment {
    let description_changed = stored.description != remote.description;
    let language_changed = stored.language != remote.language;
    let topics_changed = stored.topics != remote.topics;

    if stored.pushed_at != remote.pushed_at || stored.languages.is_none() {
        return ChangeAssessment {
            class: ChangeClass::Heavy,
            needs_reanalysis: false,
            content_changed: description_changed || language_changed || topics_changed,
            patch: RepositoryPatch::default(),
        };
    }

    let patch = RepositoryPatch {
        stars: changed(&stored.stars, &remote.stars),
        forks: changed(&stored.forks, &remote.forks),
        description: changed(&stored.description, &remote.description),
        language: changed(&stored.language, &remote.language),
        archived: changed(&stored.archived, &remote.archived),
        visibility: changed(&stored.visibility, &remote.visibility),
        owner_type: changed(&stored.owner_type, &remote.owner_type),
    };
    if patch.is_empty() {
        return ChangeAssessment {
            class: ChangeClass::None,
            needs_reanalysis: false,
            content_changed: false,
            patch,
        };
    }
    ChangeAssessment {
        class: ChangeClass::Light,
        needs_reanalysis: description_changed || language_changed,
        content_changed: description_changed || language_changed,
        patch,
    }
}

/// Truncates on a character boundary.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Forced run: ends with a full semantic-edge rebuild.
    pub full: bool,
    pub skip_analysis: bool,
    /// Re-analyse heavy changes instead of keeping the stored analysis.
    pub force_reanalysis: bool,
}

#[derive(Debug, Default)]
struct Tally {
    total: i64,
    added: i64,
    updated: i64,
    unchanged: i64,
    deleted: i64,
    failed: i64,
    errors: Vec<String>,
}

impl Tally {
    fn fail(&mut self, full_name: &str, err: impl std::fmt::Display) {
        warn!(repo = %full_name, "sync failed for repository: {err}");
        self.failed += 1;
        self.errors.push(format!("{full_name}: {err}"));
    }
}

pub struct SyncEngine {
    store: Store,
    source: Arc<dyn StarSource>,
    analyzer: Analyzer,
    index: Option<Arc<dyn VectorIndex>>,
    worker: Arc<IndexWorker>,
    cfg: SyncConfig,
    semantic_top_k: usize,
    semantic_min_similarity: f64,
    timeout: Duration,
    run_lock: Mutex<()>,
}

impl SyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        source: Arc<dyn StarSource>,
        analyzer: Analyzer,
        index: Option<Arc<dyn VectorIndex>>,
        worker: Arc<IndexWorker>,
        cfg: SyncConfig,
        graph: &GraphConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            source,
            analyzer,
            index,
            worker,
            cfg,
            semantic_top_k: graph.semantic_top_k,
            semantic_min_similarity: graph.semantic_min_similarity,
            timeout,
            run_lock: Mutex::new(()),
        }
    }

    /// Runs one synchronization and appends its `SyncRun`.
    ///
    /// Per-repository failures are counted and the run continues. A failure
    /// to fetch the remote set or load the local one records a failed run
    /// and is returned.
    pub async fn run(&self, opts: SyncOptions) -> Result<SyncRun> {
        let _guard = self.run_lock.lock().await;
        let mut run = SyncRun {
            kind: if opts.full { "full" } else { "incremental" }.to_string(),
            started_at: chrono::Utc::now().timestamp(),
            ..SyncRun::default()
        };
        let mut tally = Tally::default();
        let outcome = self.execute(opts, &mut tally).await;
        if let Err(e) = &outcome {
            tally.errors.insert(0, e.to_string());
        }
        run.status = if outcome.is_ok() { "completed" } else { "failed" }.to_string();
        run.completed_at = chrono::Utc::now().timestamp();
        run.total = tally.total;
        run.added = tally.added;
        run.updated = tally.updated;
        run.unchanged = tally.unchanged;
        run.deleted = tally.deleted;
        run.failed = tally.failed;
        if !tally.errors.is_empty() {
            run.error_text = Some(truncate_chars(
                &tally.errors.join("; "),
                self.cfg.error_text_limit,
            ));
        }
        match (self.store.insert_sync_run(&run).await, &outcome) {
            (Ok(id), _) => run.id = id,
            (Err(e), Err(_)) => warn!("recording failed sync run: {e:#}"),
            (Err(e), Ok(())) => return Err(e.into()),
        }
        info!(
            kind = %run.kind,
            status = %run.status,
            added = run.added,
            updated = run.updated,
            deleted = run.deleted,
            failed = run.failed,
            "sync run recorded"
        );
        outcome.map(|_| run)
    }

    async fn execute(&self, opts: SyncOptions, tally: &mut Tally) -> Result<()> {
        let remote = self
            .source
            .fetch_starred()
            .await
            .map_err(|e| CoreError::Remote(e.to_string()))?;
        let mut remote_map: BTreeMap<String, RemoteRepository> = BTreeMap::new();
        for repo in remote {
            repo.full_name.parse::<RepoName>()?;
            remote_map.insert(repo.full_name.clone(), repo);
        }
        let local_map: HashMap<String, Repository> = self
            .store
            .all_repositories()
            .await?
            .into_iter()
            .map(|r| (r.full_name.clone(), r))
            .collect();

        let deleted: Vec<String> = {
            let mut names: Vec<String> = local_map
                .keys()
                .filter(|name| !remote_map.contains_key(*name))
                .cloned()
                .collect();
            names.sort();
            names
        };
        tally.total = (remote_map.len() + deleted.len()) as i64;
        debug!(
            remote = remote_map.len(),
            local = local_map.len(),
            deleted = deleted.len(),
            "partitioned starred set"
        );

        let analyze = !(opts.skip_analysis || self.cfg.skip_analysis);
        for (name, remote) in &remote_map {
            let outcome = match local_map.get(name) {
                None => self.add(remote, analyze, tally).await,
                Some(stored) => self.reconcile(stored, remote, opts, analyze, tally).await,
            };
            if let Err(e) = outcome {
                tally.fail(name, e);
            }
        }

        for name in &deleted {
            match self.remove(name).await {
                Ok(()) => tally.deleted += 1,
                Err(e) => tally.fail(name, e),
            }
        }

        if opts.full {
            self.enqueue(IndexJob::RebuildSemantic {
                top_k: self.semantic_top_k,
                min_similarity: self.semantic_min_similarity,
            })
            .await;
        }
        Ok(())
    }

    async fn add(&self, remote: &RemoteRepository, analyze: bool, tally: &mut Tally) -> Result<()> {
        let repo = self.build_record(remote, None, analyze).await?;
        self.store.upsert_repository(&repo).await?;
        tally.added += 1;
        self.refresh(&repo.full_name).await;
        Ok(())
    }

    async fn reconcile(
        &self,
        stored: &Repository,
        remote: &RemoteRepository,
        opts: SyncOptions,
        analyze: bool,
        tally: &mut Tally,
    ) -> Result<()> {
        let assessment = classify_change(stored, remote);
        match assessment.class {
            ChangeClass::None => {
                tally.unchanged += 1;
            }
            ChangeClass::Heavy => {
                let reanalyze = analyze && (opts.force_reanalysis || !stored.has_analysis());
                let repo = self.build_record(remote, Some(stored), reanalyze).await?;
                self.store.upsert_repository(&repo).await?;
                tally.updated += 1;
                if assessment.content_changed || repo.analysis() != stored.analysis() {
                    self.refresh(&repo.full_name).await;
                }
            }
            ChangeClass::Light => {
                self.store
                    .patch_repository(&stored.full_name, &assessment.patch)
                    .await?;
                if assessment.needs_reanalysis && analyze {
                    let mut patched = stored.clone();
                    patched.description = remote.description.clone();
                    patched.language = remote.language.clone();
                    let readme = self.readme(&stored.full_name).await;
                    if let Some(analysis) = self.analyzer.analyze(&patched, readme).await {
                        // Patch stays applied; the previous analysis remains.
                        if let Err(e) = self
                            .store
                            .update_analysis(&stored.full_name, &analysis)
                            .await
                        {
                            warn!(repo = %stored.full_name, "storing re-analysis failed: {e:#}");
                        }
                    }
                }
                tally.updated += 1;
                if assessment.content_changed {
                    self.refresh(&stored.full_name).await;
                }
            }
        }
        Ok(())
    }

    async fn remove(&self, full_name: &str) -> Result<()> {
        match self.cfg.delete_mode {
            DeleteMode::Hard => self.store.delete_repository(full_name).await?,
            DeleteMode::Soft => self.store.soft_delete_repository(full_name).await?,
        };
        if let Some(index) = &self.index {
            if let Err(e) = with_timeout("vector remove", self.timeout, index.remove(full_name)).await {
                warn!(repo = %full_name, "vector index removal failed: {e}");
            }
        }
        Ok(())
    }

    /// Full record from remote metadata. `previous` analysis is kept unless
    /// `analyze` produces a fresh one.
    async fn build_record(
        &self,
        remote: &RemoteRepository,
        previous: Option<&Repository>,
        analyze: bool,
    ) -> Result<Repository> {
        let languages = with_timeout(
            "language breakdown",
            self.timeout,
            async { self.source.fetch_languages(&remote.full_name).await.map_err(CoreError::from) },
        )
        .await?;
        let mut repo = Repository {
            full_name: remote.full_name.clone(),
            owner: remote.owner.clone(),
            name: remote.name.clone(),
            description: remote.description.clone(),
            url: remote.url.clone(),
            language: remote.language.clone(),
            languages: Some(languages),
            topics: remote.topics.clone(),
            stars: remote.stars,
            forks: remote.forks,
            pushed_at: remote.pushed_at.clone(),
            archived: remote.archived,
            visibility: remote.visibility.clone(),
            owner_type: remote.owner_type.clone(),
            starred_at: remote.starred_at.clone(),
            ..Repository::default()
        };
        if let Some(previous) = previous {
            repo.set_analysis(previous.analysis());
        }
        if analyze {
            let readme = self.readme(&remote.full_name).await;
            if let Some(analysis) = self.analyzer.analyze(&repo, readme).await {
                repo.set_analysis(analysis);
            }
        }
        Ok(repo)
    }

    async fn readme(&self, full_name: &str) -> Option<String> {
        if !self.cfg.fetch_readme {
            return None;
        }
        let fetch = async { self.source.fetch_readme(full_name).await.map_err(CoreError::from) };
        match with_timeout("readme", self.timeout, fetch).await {
            Ok(readme) => readme,
            Err(e) => {
                warn!(repo = %full_name, "readme unavailable: {e}");
                None
            }
        }
    }

    async fn refresh(&self, full_name: &str) {
        self.enqueue(IndexJob::Refresh {
            full_name: full_name.to_string(),
        })
        .await;
    }

    async fn enqueue(&self, job: IndexJob) {
        if let Err(e) = self.worker.enqueue(job).await {
            warn!("index job dropped: {e}");
        }
    }
}
