//! Background vector-index and semantic-edge maintenance.
//!
//! Sync enqueues work here instead of spawning detached tasks, so callers can
//! `flush()` and observe completion.

use crate::error::{with_timeout, CoreError, Result};
use crate::semantic::SemanticEdgeDiscovery;
use crate::vectorstore::VectorIndex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storage::Store;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum IndexJob {
    /// Re-embed one repository and recompute its semantic edges.
    Refresh { full_name: String },
    /// Replace every semantic edge.
    RebuildSemantic { top_k: usize, min_similarity: f64 },
}

enum Message {
    Job(IndexJob),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub failed: u64,
}

struct Worker {
    store: Store,
    index: Option<Arc<dyn VectorIndex>>,
    semantic: Option<Arc<SemanticEdgeDiscovery>>,
    top_k: usize,
    min_similarity: f64,
    timeout: Duration,
    counters: Arc<Counters>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<Message>) {
        while let Some(message) = rx.recv().await {
            match message {
                Message::Job(job) => {
                    let outcome = self.process(&job).await;
                    self.counters.processed.fetch_add(1, Ordering::Relaxed);
                    if let Err(e) = outcome {
                        self.counters.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(?job, "index job failed: {e}");
                    }
                }
                Message::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        debug!("index worker stopped");
    }

    async fn process(&self, job: &IndexJob) -> Result<()> {
        match job {
            IndexJob::Refresh { full_name } => {
                let Some(index) = &self.index else {
                    return Ok(());
                };
                match self.store.get_repository(full_name).await? {
                    Some(repo) if repo.deleted_at.is_none() => {
                        with_timeout("vector upsert", self.timeout, index.upsert(&[repo])).await?;
                    }
                    _ => {
                        with_timeout("vector remove", self.timeout, index.remove(full_name)).await?;
                        return Ok(());
                    }
                }
                if let Some(semantic) = &self.semantic {
                    semantic
                        .update_for_node(full_name, self.top_k, self.min_similarity)
                        .await?;
                }
                Ok(())
            }
            IndexJob::RebuildSemantic {
                top_k,
                min_similarity,
            } => {
                let Some(semantic) = &self.semantic else {
                    debug!("no vector index configured, semantic rebuild skipped");
                    return Ok(());
                };
                semantic.rebuild_all(*top_k, *min_similarity).await?;
                Ok(())
            }
        }
    }
}

/// Handle to the single background worker draining a bounded job queue.
pub struct IndexWorker {
    tx: Mutex<Option<mpsc::Sender<Message>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl IndexWorker {
    pub fn spawn(
        store: Store,
        index: Option<Arc<dyn VectorIndex>>,
        semantic: Option<Arc<SemanticEdgeDiscovery>>,
        graph: &crate::config::GraphConfig,
        timeout: Duration,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());
        let worker = Worker {
            store,
            index,
            semantic,
            top_k: graph.semantic_top_k,
            min_similarity: graph.semantic_min_similarity,
            timeout,
            counters: counters.clone(),
        };
        let handle = tokio::spawn(worker.run(rx));
        Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            counters,
        }
    }

    async fn sender(&self) -> Result<mpsc::Sender<Message>> {
        self.tx.lock().await.clone().ok_or(CoreError::WorkerClosed)
    }

    /// Queues a job; waits for room when the queue is full.
    pub async fn enqueue(&self, job: IndexJob) -> Result<()> {
        let tx = self.sender().await?;
        tx.send(Message::Job(job))
            .await
            .map_err(|_| CoreError::WorkerClosed)
    }

    /// Resolves once every job queued before the call has been processed.
    pub async fn flush(&self) -> Result<()> {
        let tx = self.sender().await?;
        let (done_tx, done_rx) = oneshot::channel();
        tx.send(Message::Flush(done_tx))
            .await
            .map_err(|_| CoreError::WorkerClosed)?;
        done_rx.await.map_err(|_| CoreError::WorkerClosed)
    }

    /// Closes the queue, drains what is left and waits for the worker.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.lock().await.take();
        if let Some(handle) = self.handle.lock().await.take() {
            handle
                .await
                .map_err(|e| CoreError::Storage(anyhow::anyhow!("index worker panicked: {e}")))?;
            info!(processed = self.stats().processed, "index worker shut down");
        }
        Ok(())
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}
