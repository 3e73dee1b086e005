mod common;

use common::{harness, hit, remote, FakeIndex, FakeSource};
use stargraph_core::config::{AppConfig, DeleteMode};
use stargraph_core::models::EdgeType;
use stargraph_core::sync::SyncOptions;
use std::sync::atomic::Ordering;

fn starred() -> Vec<providers::github::RemoteRepository> {
    vec![
        remote("acme/rocket", "Rust", &["web", "async"], 120),
        remote("acme/comet", "Rust", &["cli"], 40),
        remote("zed/gopher", "Go", &["web"], 15),
    ]
}

#[tokio::test]
async fn second_sync_against_unchanged_remote_is_a_no_op() {
    let h = harness(
        "sync_idempotent",
        AppConfig::default(),
        FakeSource::with(starred()),
        Some(FakeIndex::default()),
    )
    .await;

    let first = h.ctx.sync.run(SyncOptions::default()).await.unwrap();
    assert_eq!(first.status, "completed");
    assert_eq!((first.total, first.added, first.failed), (3, 3, 0));
    assert_eq!(h.llm.calls.load(Ordering::SeqCst), 3);

    let second = h.ctx.sync.run(SyncOptions::default()).await.unwrap();
    assert_eq!(second.updated, 0);
    assert_eq!(second.unchanged, 3);
    assert_eq!(second.added + second.deleted + second.failed, 0);
    assert_eq!(h.llm.calls.load(Ordering::SeqCst), 3);

    let runs = h.ctx.store.recent_sync_runs(10).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].id, second.id);

    let stored = h.ctx.store.get_repository("acme/rocket").await.unwrap().unwrap();
    assert_eq!(stored.summary.as_deref(), Some("Summary of acme/rocket"));
    assert!(stored.languages.is_some());
}

#[tokio::test]
async fn new_repositories_reach_the_vector_index() {
    let h = harness(
        "sync_index_refresh",
        AppConfig::default(),
        FakeSource::with(starred()),
        Some(FakeIndex::default()),
    )
    .await;
    h.ctx.sync.run(SyncOptions::default()).await.unwrap();
    h.ctx.worker.flush().await.unwrap();

    let index = h.index.as_ref().unwrap();
    let mut upserted = index.upserted.lock().unwrap().clone();
    upserted.sort();
    assert_eq!(upserted, vec!["acme/comet", "acme/rocket", "zed/gopher"]);
    assert_eq!(h.ctx.worker.stats().failed, 0);
}

#[tokio::test]
async fn light_and_heavy_changes_keep_analysis() {
    let h = harness(
        "sync_light_heavy",
        AppConfig::default(),
        FakeSource::with(starred()),
        None,
    )
    .await;
    h.ctx.sync.run(SyncOptions::default()).await.unwrap();

    let mut changed = starred();
    changed[0].stars = 999;
    changed[1].pushed_at = Some("2024-06-01T00:00:00Z".to_string());
    changed[2].description = Some("a different gopher".to_string());
    h.source.set(changed);

    let run = h.ctx.sync.run(SyncOptions::default()).await.unwrap();
    assert_eq!((run.updated, run.unchanged, run.failed), (3, 0, 0));
    // Only the description change is re-analysed.
    assert_eq!(h.llm.calls.load(Ordering::SeqCst), 4);

    let rocket = h.ctx.store.get_repository("acme/rocket").await.unwrap().unwrap();
    assert_eq!(rocket.stars, 999);
    assert_eq!(rocket.summary.as_deref(), Some("Summary of acme/rocket"));

    let comet = h.ctx.store.get_repository("acme/comet").await.unwrap().unwrap();
    assert_eq!(comet.pushed_at.as_deref(), Some("2024-06-01T00:00:00Z"));
    assert_eq!(comet.categories, vec!["developer-tools"]);

    let gopher = h.ctx.store.get_repository("zed/gopher").await.unwrap().unwrap();
    assert_eq!(gopher.description.as_deref(), Some("a different gopher"));
}

#[tokio::test]
async fn forced_reanalysis_calls_the_model_for_heavy_changes() {
    let h = harness(
        "sync_force_reanalysis",
        AppConfig::default(),
        FakeSource::with(starred()),
        None,
    )
    .await;
    h.ctx.sync.run(SyncOptions::default()).await.unwrap();

    let mut changed = starred();
    changed[1].pushed_at = Some("2024-06-01T00:00:00Z".to_string());
    h.source.set(changed);
    let opts = SyncOptions {
        force_reanalysis: true,
        ..SyncOptions::default()
    };
    h.ctx.sync.run(opts).await.unwrap();
    assert_eq!(h.llm.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn skipped_analysis_leaves_records_unanalysed() {
    let h = harness(
        "sync_skip_analysis",
        AppConfig::default(),
        FakeSource::with(starred()),
        None,
    )
    .await;
    let opts = SyncOptions {
        skip_analysis: true,
        ..SyncOptions::default()
    };
    h.ctx.sync.run(opts).await.unwrap();
    assert_eq!(h.llm.calls.load(Ordering::SeqCst), 0);
    let comet = h.ctx.store.get_repository("acme/comet").await.unwrap().unwrap();
    assert!(!comet.has_analysis());
}

#[tokio::test]
async fn failures_are_counted_and_removals_applied() {
    let h = harness(
        "sync_failures",
        AppConfig::default(),
        FakeSource::with(starred()),
        Some(FakeIndex::default()),
    )
    .await;
    h.ctx.sync.run(SyncOptions::default()).await.unwrap();

    let mut next = starred();
    next.remove(0);
    next.push(remote("new/broken", "C", &[], 3));
    h.source.set(next);
    h.source.break_repo("new/broken");

    let run = h.ctx.sync.run(SyncOptions::default()).await.unwrap();
    assert_eq!(run.status, "completed");
    assert_eq!(run.total, 4);
    assert_eq!((run.added, run.deleted, run.failed, run.unchanged), (0, 1, 1, 2));
    assert_eq!(
        run.added + run.updated + run.unchanged + run.deleted + run.failed,
        run.total
    );
    assert!(run.error_text.as_deref().unwrap().contains("new/broken"));

    assert!(h.ctx.store.get_repository("acme/rocket").await.unwrap().is_none());
    assert!(h.ctx.store.get_repository("new/broken").await.unwrap().is_none());
    let removed = h.index.as_ref().unwrap().removed.lock().unwrap().clone();
    assert!(removed.contains(&"acme/rocket".to_string()));
}

#[tokio::test]
async fn unreachable_remote_records_a_failed_run() {
    let h = harness(
        "sync_unreachable",
        AppConfig::default(),
        FakeSource::with(starred()),
        None,
    )
    .await;
    h.source.unavailable.store(true, Ordering::SeqCst);

    let err = h.ctx.sync.run(SyncOptions::default()).await.unwrap_err();
    assert!(matches!(err, stargraph_core::CoreError::Remote(_)));

    let runs = h.ctx.store.recent_sync_runs(1).await.unwrap();
    assert_eq!(runs[0].status, "failed");
    assert!(runs[0]
        .error_text
        .as_deref()
        .unwrap()
        .contains("connection refused"));
}

#[tokio::test]
async fn soft_delete_keeps_the_row_and_revives_it() {
    let mut config = AppConfig::default();
    config.sync.delete_mode = DeleteMode::Soft;
    let h = harness("sync_soft_delete", config, FakeSource::with(starred()), None).await;
    h.ctx.sync.run(SyncOptions::default()).await.unwrap();

    h.source.set(starred()[1..].to_vec());
    let run = h.ctx.sync.run(SyncOptions::default()).await.unwrap();
    assert_eq!(run.deleted, 1);
    let rocket = h.ctx.store.get_repository("acme/rocket").await.unwrap().unwrap();
    assert!(rocket.deleted_at.is_some());
    assert_eq!(h.ctx.store.all_repositories().await.unwrap().len(), 2);

    h.source.set(starred());
    let run = h.ctx.sync.run(SyncOptions::default()).await.unwrap();
    assert_eq!(run.added, 1);
    let rocket = h.ctx.store.get_repository("acme/rocket").await.unwrap().unwrap();
    assert!(rocket.deleted_at.is_none());
}

#[tokio::test]
async fn full_sync_rebuilds_semantic_edges() {
    let index = FakeIndex::default();
    index.set_neighbours(
        "acme/rocket",
        vec![hit("zed/gopher", 0.9), hit("acme/comet", 0.5)],
    );
    let h = harness(
        "sync_full_semantic",
        AppConfig::default(),
        FakeSource::with(starred()),
        Some(index),
    )
    .await;
    let opts = SyncOptions {
        full: true,
        ..SyncOptions::default()
    };
    let run = h.ctx.sync.run(opts).await.unwrap();
    assert_eq!(run.kind, "full");
    h.ctx.worker.flush().await.unwrap();

    let edges = h.ctx.store.edges_of_type(EdgeType::Semantic).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].source, "acme/rocket");
    assert_eq!(edges[0].target, "zed/gopher");
    assert!((edges[0].weight - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn lost_reanalysis_still_counts_as_updated() {
    let h = harness(
        "sync_reanalysis_lost",
        AppConfig::default(),
        FakeSource::with(starred()),
        Some(FakeIndex::default()),
    )
    .await;
    h.ctx.sync.run(SyncOptions::default()).await.unwrap();
    h.ctx.worker.flush().await.unwrap();
    sqlx::query(
        "CREATE TRIGGER block_analysis BEFORE UPDATE OF summary ON repositories \
         BEGIN SELECT RAISE(ABORT, 'analysis writes disabled'); END",
    )
    .execute(h.ctx.store.pool())
    .await
    .unwrap();

    let mut changed = starred();
    changed[2].description = Some("a different gopher".to_string());
    h.source.set(changed);
    let run = h.ctx.sync.run(SyncOptions::default()).await.unwrap();
    assert_eq!((run.updated, run.unchanged, run.failed), (1, 2, 0));
    assert_eq!(
        run.added + run.updated + run.unchanged + run.deleted + run.failed,
        run.total
    );

    let gopher = h.ctx.store.get_repository("zed/gopher").await.unwrap().unwrap();
    assert_eq!(gopher.description.as_deref(), Some("a different gopher"));
    assert_eq!(gopher.summary.as_deref(), Some("Summary of zed/gopher"));

    h.ctx.worker.flush().await.unwrap();
    let upserted = h.index.as_ref().unwrap().upserted.lock().unwrap().clone();
    assert_eq!(upserted.iter().filter(|n| *n == "zed/gopher").count(), 2);
}

#[tokio::test]
async fn unrecordable_failed_run_returns_the_sync_error() {
    let h = harness(
        "sync_unrecordable",
        AppConfig::default(),
        FakeSource::with(starred()),
        None,
    )
    .await;
    sqlx::query("DROP TABLE sync_runs")
        .execute(h.ctx.store.pool())
        .await
        .unwrap();
    h.source.unavailable.store(true, Ordering::SeqCst);

    let err = h.ctx.sync.run(SyncOptions::default()).await.unwrap_err();
    assert!(matches!(err, stargraph_core::CoreError::Remote(_)));
}
