mod common;

use common::{harness, remote, FakeSource};
use stargraph_core::config::AppConfig;
use std::time::Duration;

#[tokio::test]
async fn scheduler_runs_immediately_and_stops() {
    let source = FakeSource::with(vec![remote("acme/rocket", "Rust", &["web"], 10)]);
    let mut config = AppConfig::default();
    config.sync.skip_analysis = true;
    let h = harness("scheduler_lifecycle", config, source, None).await;

    assert!(h.ctx.scheduler.start(Duration::from_secs(3600)).await.unwrap());
    assert!(!h.ctx.scheduler.start(Duration::from_secs(3600)).await.unwrap());
    assert!(h.ctx.scheduler.is_running().await);

    let mut runs = Vec::new();
    for _ in 0..100 {
        runs = h.ctx.store.recent_sync_runs(5).await.unwrap();
        if !runs.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].added, 1);

    assert!(h.ctx.scheduler.stop().await.unwrap());
    assert!(!h.ctx.scheduler.stop().await.unwrap());
    assert!(!h.ctx.scheduler.is_running().await);
}

#[tokio::test]
async fn zero_interval_is_rejected() {
    let h = harness("scheduler_zero", AppConfig::default(), FakeSource::default(), None).await;
    let err = h.ctx.scheduler.start(Duration::ZERO).await.unwrap_err();
    assert!(matches!(err, stargraph_core::CoreError::InvalidArgument(_)));
}

#[tokio::test]
async fn shutdown_drains_the_worker() {
    let h = harness("scheduler_shutdown", AppConfig::default(), FakeSource::default(), None).await;
    h.ctx.shutdown().await.unwrap();
    assert!(h.ctx.worker.flush().await.is_err());
}
