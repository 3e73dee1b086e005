use crate::error::{CoreError, Result};
use crate::sync::{SyncEngine, SyncOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

struct Running {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Periodic sync owned by the process context.
pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    options: SyncOptions,
    running: Mutex<Option<Running>>,
}

impl SyncScheduler {
    pub fn new(engine: Arc<SyncEngine>, options: SyncOptions) -> Self {
        Self {
            engine,
            options,
            running: Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Starts syncing every `interval`, the first run immediately.
    /// Returns false when already started.
    pub async fn start(&self, interval: Duration) -> Result<bool> {
        if interval.is_zero() {
            return Err(CoreError::InvalidArgument("sync interval must be positive".into()));
        }
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(false);
        }
        let (stop, mut stop_rx) = oneshot::channel();
        let engine = self.engine.clone();
        let options = self.options;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        if let Err(e) = engine.run(options).await {
                            warn!("scheduled sync failed: {e}");
                        }
                    }
                }
            }
        });
        info!(interval_secs = interval.as_secs(), "sync scheduler started");
        *running = Some(Running { stop, handle });
        Ok(true)
    }

    /// Stops the loop, waiting for an in-flight run to finish.
    pub async fn stop(&self) -> Result<bool> {
        let Some(Running { stop, handle }) = self.running.lock().await.take() else {
            return Ok(false);
        };
        let _ = stop.send(());
        handle
            .await
            .map_err(|e| CoreError::Storage(anyhow::anyhow!("sync scheduler panicked: {e}")))?;
        info!("sync scheduler stopped");
        Ok(true)
    }
}
