//! Core library: relationship graph, hybrid search, recommendations,
//! starred-set synchronization and the similarity network.

pub mod analysis;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod graph;
pub mod indexer;
pub mod models;
pub mod pipeline;
pub mod recommend;
pub mod scheduler;
pub mod search;
pub mod semantic;
pub mod similarity;
pub mod sync;
pub mod synonyms;
pub mod vectorstore;

pub use error::{CoreError, Result};
pub use pipeline::{AppContext, Collaborators};
