//! Relationship graph: discovery of author, ecosystem and collection edges
//! between starred repositories, and transactional per-type rebuilds.
//!
//! Discovery over an unordered pair `(i, j)` with `i < j` yields one directed
//! edge `i -> j`. Lookups are by source only, so unless `mirror_edges` is
//! enabled a pair is reachable from its first member only.

use crate::error::{CoreError, Result};
use crate::models::{round_to, Edge, EdgeFilter, EdgeType, Repository};
use crate::semantic::SemanticEdgeDiscovery;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;
use storage::Store;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const AUTHOR_WEIGHT: f64 = 1.0;
pub const LANGUAGE_WEIGHT: f64 = 0.6;
pub const COLLECTION_WEIGHT: f64 = 0.5;
/// Languages with this many repositories or more are too common to link on.
pub const MAX_LANGUAGE_GROUP: usize = 50;
pub const LANGUAGE_GROUP_PARTICIPANTS: usize = 20;
pub const MIN_SHARED_TOPICS: usize = 2;
pub const MIN_TOPIC_SIMILARITY: f64 = 0.3;

/// Edges found by one discovery routine plus the inputs it had to skip.
#[derive(Debug, Default)]
pub struct Discovery {
    pub edges: Vec<Edge>,
    pub skipped: usize,
}

impl Discovery {
    fn extend(&mut self, other: Discovery) {
        self.edges.extend(other.edges);
        self.skipped += other.skipped;
    }
}

/// |A ∩ B| / |A ∪ B|; zero when either set is empty.
pub fn jaccard<T: Eq + Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

fn has_valid_identity(repo: &Repository) -> bool {
    let name = repo.full_name.trim();
    matches!(name.find('/'), Some(i) if i > 0 && i + 1 < name.len())
}

/// Groups items by key preserving first-seen order of both groups and members.
fn ordered_groups<'a>(items: impl Iterator<Item = (&'a str, &'a str)>) -> Vec<(&'a str, Vec<&'a str>)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
    for (key, member) in items {
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push((key, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(member);
    }
    groups
}

fn pair_edges(
    members: &[&str],
    edge_type: EdgeType,
    weight: f64,
    metadata: &serde_json::Value,
    out: &mut Vec<Edge>,
) {
    for (i, source) in members.iter().enumerate() {
        for target in &members[i + 1..] {
            out.push(Edge::new(*source, *target, edge_type, weight, metadata.clone()));
        }
    }
}

/// One author edge per unordered pair of repositories sharing an owner.
///
/// Owners are compared trimmed and case-sensitively. Repositories with an
/// empty owner or an identity lacking the `/` separator are counted in
/// `skipped`.
pub fn discover_author_edges(nodes: &[Repository]) -> Discovery {
    let mut skipped = 0;
    let valid = nodes.iter().filter_map(|repo| {
        let owner = repo.owner.trim();
        if owner.is_empty() || !has_valid_identity(repo) {
            skipped += 1;
            None
        } else {
            Some((owner, repo.full_name.trim()))
        }
    });
    let groups = ordered_groups(valid);

    let mut edges = Vec::new();
    for (owner, members) in groups {
        if members.len() < 2 {
            continue;
        }
        let metadata = serde_json::json!({ "owner": owner });
        pair_edges(&members, EdgeType::Author, AUTHOR_WEIGHT, &metadata, &mut edges);
    }
    Discovery { edges, skipped }
}

/// Language pass followed by topic pass; results are concatenated.
pub fn discover_ecosystem_edges(nodes: &[Repository]) -> Discovery {
    let mut discovery = discover_language_edges(nodes);
    discovery.extend(discover_topic_edges(nodes));
    discovery
}

/// Pairs within a primary-language group of size in (1, 50), first 20 members only.
pub fn discover_language_edges(nodes: &[Repository]) -> Discovery {
    let mut skipped = 0;
    let with_language = nodes.iter().filter_map(|repo| {
        if !has_valid_identity(repo) {
            skipped += 1;
            return None;
        }
        let language = repo.language.as_deref().map(str::trim).filter(|l| !l.is_empty())?;
        Some((language, repo.full_name.trim()))
    });
    let groups = ordered_groups(with_language);

    let mut edges = Vec::new();
    for (language, members) in groups {
        if members.len() <= 1 || members.len() >= MAX_LANGUAGE_GROUP {
            continue;
        }
        let participants = &members[..members.len().min(LANGUAGE_GROUP_PARTICIPANTS)];
        let metadata = serde_json::json!({ "language": language });
        pair_edges(participants, EdgeType::Ecosystem, LANGUAGE_WEIGHT, &metadata, &mut edges);
    }
    Discovery { edges, skipped }
}

/// Pairs whose topic sets share at least two topics with Jaccard above 0.3.
pub fn discover_topic_edges(nodes: &[Repository]) -> Discovery {
    let mut skipped = 0;
    let tagged: Vec<(&str, HashSet<&str>)> = nodes
        .iter()
        .filter_map(|repo| {
            if !has_valid_identity(repo) {
                skipped += 1;
                return None;
            }
            let topics: HashSet<&str> = repo.topics.iter().map(String::as_str).collect();
            (!topics.is_empty()).then(|| (repo.full_name.trim(), topics))
        })
        .collect();

    let mut edges = Vec::new();
    for (i, (source, a)) in tagged.iter().enumerate() {
        for (target, b) in &tagged[i + 1..] {
            let shared = a.intersection(b).count();
            if shared < MIN_SHARED_TOPICS {
                continue;
            }
            let similarity = jaccard(a, b);
            if similarity > MIN_TOPIC_SIMILARITY {
                edges.push(Edge::new(
                    *source,
                    *target,
                    EdgeType::Ecosystem,
                    round_to(similarity, 2),
                    serde_json::json!({ "common_topics": shared }),
                ));
            }
        }
    }
    Discovery { edges, skipped }
}

/// Pairs of repositories filed under the same named collection.
pub async fn discover_collection_edges(store: &Store) -> Result<Discovery> {
    let pairs = store.collection_pairs().await?;
    let edges = pairs
        .into_iter()
        .map(|pair| {
            Edge::new(
                pair.source,
                pair.target,
                EdgeType::Collection,
                COLLECTION_WEIGHT,
                serde_json::json!({ "collection": pair.collection }),
            )
        })
        .collect();
    Ok(Discovery { edges, skipped: 0 })
}

#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub edge_type: EdgeType,
    pub deleted: u64,
    pub inserted: usize,
    pub skipped: usize,
}

/// Rebuilds edge types wholesale. Concurrent rebuilds are serialised.
pub struct GraphBuilder {
    store: Store,
    semantic: Option<Arc<SemanticEdgeDiscovery>>,
    mirror_edges: bool,
    semantic_top_k: usize,
    semantic_min_similarity: f64,
    rebuild_lock: Mutex<()>,
}

impl GraphBuilder {
    pub fn new(
        store: Store,
        semantic: Option<Arc<SemanticEdgeDiscovery>>,
        cfg: &crate::config::GraphConfig,
    ) -> Self {
        Self {
            store,
            semantic,
            mirror_edges: cfg.mirror_edges,
            semantic_top_k: cfg.semantic_top_k,
            semantic_min_similarity: cfg.semantic_min_similarity,
            rebuild_lock: Mutex::new(()),
        }
    }

    pub async fn rebuild(&self, types: &[EdgeType]) -> Result<Vec<RebuildReport>> {
        if types.is_empty() {
            return Err(CoreError::InvalidArgument("no edge types requested".into()));
        }
        let _guard = self.rebuild_lock.lock().await;
        let nodes = self.store.all_repositories().await?;
        let mut reports = Vec::with_capacity(types.len());
        for edge_type in types {
            let discovery = match edge_type {
                EdgeType::Author => discover_author_edges(&nodes),
                EdgeType::Ecosystem => discover_ecosystem_edges(&nodes),
                EdgeType::Collection => discover_collection_edges(&self.store).await?,
                EdgeType::Semantic => {
                    let Some(semantic) = &self.semantic else {
                        warn!("vector index not configured, skipping semantic edges");
                        continue;
                    };
                    let outcome = semantic
                        .rebuild_all(self.semantic_top_k, self.semantic_min_similarity)
                        .await?;
                    reports.push(RebuildReport {
                        edge_type: EdgeType::Semantic,
                        deleted: outcome.deleted,
                        inserted: outcome.inserted,
                        skipped: outcome.failed,
                    });
                    continue;
                }
            };
            if discovery.skipped > 0 {
                warn!(edge_type = %edge_type, skipped = discovery.skipped, "skipped malformed repositories");
            }
            let edges = with_mirrors(discovery.edges, self.mirror_edges);
            let (deleted, inserted) = self
                .store
                .replace_edges(&EdgeFilter::OfType(*edge_type), &edges)
                .await?;
            info!(edge_type = %edge_type, deleted, inserted, "rebuilt edges");
            reports.push(RebuildReport {
                edge_type: *edge_type,
                deleted,
                inserted,
                skipped: discovery.skipped,
            });
        }
        Ok(reports)
    }

    pub async fn rebuild_all(&self) -> Result<Vec<RebuildReport>> {
        self.rebuild(&EdgeType::ALL).await
    }
}

/// Appends the reverse of every edge when `mirror` is set.
pub fn with_mirrors(mut edges: Vec<Edge>, mirror: bool) -> Vec<Edge> {
    if mirror {
        let reversed: Vec<Edge> = edges.iter().map(Edge::mirrored).collect();
        debug!(count = reversed.len(), "adding mirrored edges");
        edges.extend(reversed);
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::owner_of;

    fn repo(full_name: &str) -> Repository {
        Repository {
            full_name: full_name.to_string(),
            owner: owner_of(full_name).to_string(),
            name: full_name.split('/').nth(1).unwrap_or_default().to_string(),
            ..Repository::default()
        }
    }

    fn with_language(full_name: &str, language: &str) -> Repository {
        Repository {
            language: Some(language.to_string()),
            ..repo(full_name)
        }
    }

    fn with_topics(full_name: &str, topics: &[&str]) -> Repository {
        Repository {
            topics: topics.iter().map(|t| t.to_string()).collect(),
            ..repo(full_name)
        }
    }

    #[test]
    fn author_edges_single_pair() {
        let d = discover_author_edges(&[repo("a/x"), repo("a/y")]);
        assert_eq!(d.edges.len(), 1);
        let edge = &d.edges[0];
        assert_eq!(edge.source, "a/x");
        assert_eq!(edge.target, "a/y");
        assert_eq!(edge.edge_type, EdgeType::Author);
        assert_eq!(edge.weight, 1.0);
        assert_eq!(edge.metadata["owner"], "a");
    }

    #[test]
    fn author_edges_are_n_choose_two_per_owner() {
        let nodes: Vec<Repository> = ["a/1", "a/2", "a/3", "a/4", "b/1", "c/1", "c/2"]
            .into_iter()
            .map(repo)
            .collect();
        let d = discover_author_edges(&nodes);
        let count = |owner: &str| d.edges.iter().filter(|e| e.metadata["owner"] == owner).count();
        assert_eq!(count("a"), 6);
        assert_eq!(count("b"), 0);
        assert_eq!(count("c"), 1);
        assert_eq!(d.skipped, 0);
    }

    #[test]
    fn author_edges_skip_malformed_items() {
        let mut no_owner = repo("z/1");
        no_owner.owner = "  ".into();
        let mut no_separator = repo("a/2");
        no_separator.full_name = "a-2".into();
        let d = discover_author_edges(&[repo("a/1"), no_owner, no_separator, repo("a/3")]);
        assert_eq!(d.skipped, 2);
        assert_eq!(d.edges.len(), 1);
    }

    #[test]
    fn author_owner_comparison_is_case_sensitive() {
        let mut upper = repo("A/y");
        upper.owner = "A".into();
        let d = discover_author_edges(&[repo("a/x"), upper]);
        assert!(d.edges.is_empty());
    }

    #[test]
    fn language_pass_ignores_singletons_and_caps_participants() {
        let mut nodes = vec![with_language("solo/one", "Zig")];
        for i in 0..25 {
            nodes.push(with_language(&format!("o{i}/r"), "Go"));
        }
        let d = discover_language_edges(&nodes);
        // 20 participants -> C(20, 2)
        assert_eq!(d.edges.len(), 190);
        assert!(d.edges.iter().all(|e| e.weight == LANGUAGE_WEIGHT));
        assert!(d.edges.iter().all(|e| e.metadata["language"] == "Go"));
        assert!(!d.edges.iter().any(|e| e.source == "o20/r" || e.target == "o24/r"));
    }

    #[test]
    fn language_pass_skips_ubiquitous_languages() {
        let nodes: Vec<Repository> = (0..MAX_LANGUAGE_GROUP)
            .map(|i| with_language(&format!("o{i}/r"), "JavaScript"))
            .collect();
        assert!(discover_language_edges(&nodes).edges.is_empty());
    }

    #[test]
    fn topic_pass_requires_two_shared_topics_and_similarity() {
        let nodes = vec![
            with_topics("a/x", &["rust", "async", "http"]),
            with_topics("b/y", &["rust", "async", "web"]),
            with_topics("c/z", &["rust", "cli"]),
            with_topics("d/w", &["rust", "async", "a", "b", "c", "d", "e"]),
            with_topics("e/empty", &[]),
        ];
        let d = discover_topic_edges(&nodes);
        for edge in &d.edges {
            let meta = edge.metadata["common_topics"].as_u64().unwrap();
            assert!(meta >= 2);
            assert!(edge.weight > MIN_TOPIC_SIMILARITY);
        }
        // a/x and b/y share 2 of 4 -> 0.5
        assert!(d
            .edges
            .iter()
            .any(|e| e.source == "a/x" && e.target == "b/y" && e.weight == 0.5));
        // a/x and d/w share 2 of 8 -> 0.25, below threshold
        assert!(!d.edges.iter().any(|e| e.source == "a/x" && e.target == "d/w"));
        assert!(!d.edges.iter().any(|e| e.target == "c/z"));
    }

    #[test]
    fn ecosystem_concatenates_both_passes() {
        let mut a = with_topics("a/x", &["rust", "async"]);
        a.language = Some("Rust".into());
        let mut b = with_topics("b/y", &["rust", "async"]);
        b.language = Some("Rust".into());
        let d = discover_ecosystem_edges(&[a, b]);
        assert_eq!(d.edges.len(), 2);
        assert_eq!(d.edges[0].weight, LANGUAGE_WEIGHT);
        assert_eq!(d.edges[1].weight, 1.0);
    }

    #[test]
    fn jaccard_of_empty_sets_is_zero() {
        let empty: HashSet<&str> = HashSet::new();
        let one: HashSet<&str> = ["x"].into_iter().collect();
        assert_eq!(jaccard(&empty, &one), 0.0);
        assert_eq!(jaccard(&one, &one), 1.0);
    }

    #[test]
    fn mirrors_reverse_each_edge() {
        let d = discover_author_edges(&[repo("a/x"), repo("a/y")]);
        let edges = with_mirrors(d.edges, true);
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[1].source, "a/y");
        assert_eq!(edges[1].target, "a/x");
    }
}
