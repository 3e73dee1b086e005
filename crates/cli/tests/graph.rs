mod common;

use common::{harness, hit, stored, FakeIndex, FakeSource, Harness};
use stargraph_core::config::AppConfig;
use stargraph_core::models::EdgeType;
use stargraph_core::semantic::SemanticEdgeDiscovery;
use stargraph_core::vectorstore::VectorIndex;
use stargraph_core::CoreError;
use std::sync::Arc;
use std::time::Duration;

async fn seeded(name: &str, index: Option<FakeIndex>) -> Harness {
    let h = harness(name, AppConfig::default(), FakeSource::default(), index).await;
    for repo in [
        stored("acme/rocket", "Rust", &["web", "async", "http"], 120),
        stored("acme/comet", "Rust", &["cli"], 40),
        stored("zed/gopher", "Go", &["web", "http"], 15),
    ] {
        h.ctx.store.upsert_repository(&repo).await.unwrap();
    }
    h
}

#[tokio::test]
async fn rebuild_discovers_every_edge_type() {
    let index = FakeIndex::default();
    index.set_neighbours("zed/gopher", vec![hit("acme/rocket", 0.75), hit("acme/comet", 0.2)]);
    let h = seeded("graph_all_types", Some(index)).await;
    h.ctx.store.add_to_collection("favourites", "zed/gopher").await.unwrap();
    h.ctx.store.add_to_collection("favourites", "acme/comet").await.unwrap();

    let reports = h.ctx.graph.rebuild(&EdgeType::ALL).await.unwrap();
    let inserted: Vec<(EdgeType, usize)> = reports.iter().map(|r| (r.edge_type, r.inserted)).collect();
    assert_eq!(
        inserted,
        vec![
            (EdgeType::Author, 1),
            (EdgeType::Ecosystem, 2),
            (EdgeType::Collection, 1),
            (EdgeType::Semantic, 1),
        ]
    );

    let author = h.ctx.store.edges_of_type(EdgeType::Author).await.unwrap();
    assert_eq!((author[0].source.as_str(), author[0].target.as_str()), ("acme/comet", "acme/rocket"));

    let ecosystem = h.ctx.store.edges_of_type(EdgeType::Ecosystem).await.unwrap();
    // Rust pair by language, web+http pair by topics.
    assert_eq!(ecosystem.len(), 2);
    let topic = ecosystem
        .iter()
        .find(|e| e.source == "acme/rocket" && e.target == "zed/gopher")
        .unwrap();
    assert!((topic.weight - 0.67).abs() < 1e-9);

    let collection = h.ctx.store.edges_of_type(EdgeType::Collection).await.unwrap();
    assert_eq!(collection[0].source, "acme/comet");
    assert_eq!(collection[0].target, "zed/gopher");

    let semantic = h.ctx.store.edges_of_type(EdgeType::Semantic).await.unwrap();
    assert_eq!(semantic[0].target, "acme/rocket");
}

#[tokio::test]
async fn rebuild_replaces_previous_edges() {
    let h = seeded("graph_replace", None).await;
    let first = h.ctx.graph.rebuild(&[EdgeType::Author]).await.unwrap();
    assert_eq!(first[0].deleted, 0);
    let second = h.ctx.graph.rebuild(&[EdgeType::Author]).await.unwrap();
    assert_eq!(second[0].deleted, 1);
    assert_eq!(second[0].inserted, 1);
    assert_eq!(h.ctx.store.edges_of_type(EdgeType::Author).await.unwrap().len(), 1);
}

#[tokio::test]
async fn semantic_rebuild_is_skipped_without_index() {
    let h = seeded("graph_no_index", None).await;
    let reports = h
        .ctx
        .graph
        .rebuild(&[EdgeType::Semantic, EdgeType::Author])
        .await
        .unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].edge_type, EdgeType::Author);
}

#[tokio::test]
async fn empty_type_list_is_rejected() {
    let h = seeded("graph_no_types", None).await;
    let err = h.ctx.graph.rebuild(&[]).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidArgument(_)));
}

#[tokio::test]
async fn failing_node_is_skipped_during_semantic_rebuild() {
    let index = FakeIndex::default();
    index.set_neighbours("zed/gopher", vec![hit("acme/rocket", 0.75)]);
    index.break_node("acme/comet");
    let h = seeded("graph_semantic_node_failure", Some(index)).await;
    let index: Arc<dyn VectorIndex> = h.index.clone().unwrap();
    let semantic =
        SemanticEdgeDiscovery::new(h.ctx.store.clone(), index, Duration::from_secs(5), false);

    let outcome = semantic.rebuild_all(10, 0.6).await.unwrap();
    assert_eq!(outcome.nodes, 3);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.inserted, 1);

    let edges = h.ctx.store.edges_of_type(EdgeType::Semantic).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!((edges[0].source.as_str(), edges[0].target.as_str()), ("zed/gopher", "acme/rocket"));

    let reports = h.ctx.graph.rebuild(&[EdgeType::Semantic]).await.unwrap();
    assert_eq!(reports[0].skipped, 1);
    assert_eq!(reports[0].inserted, 1);
}
