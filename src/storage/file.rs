use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::{MemoryStore, Store};
use crate::error::StoreResult;
use crate::model::{MetricKind, MetricRecord, Snapshot};

/// A [`MemoryStore`] made durable by whole-table JSON snapshots.
///
/// With a positive interval a background task saves the table on every
/// tick; with a zero interval the table is only written when asked to, and
/// on [`Store::close`].
pub struct FileStore {
    table: Arc<MemoryStore>,
    path: PathBuf,
    shutdown: watch::Sender<bool>,
    /// Handle to the flush task so `close` can await it.
    flusher: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl FileStore {
    /// Build the store, restore it from `path` when `restore` is set, and
    /// start the flush loop. An unreadable snapshot is logged and the table
    /// starts empty.
    pub async fn open(path: PathBuf, interval: Duration, restore: bool) -> StoreResult<Self> {
        let table = Arc::new(MemoryStore::new());

        if restore {
            if let Err(e) = table.load_metrics(&path).await {
                error!(path = %path.display(), error = %e, "restore failed, starting empty");
            }
        }

        let (shutdown, rx) = watch::channel(false);
        let flusher = if interval.is_zero() {
            None
        } else {
            Some(tokio::spawn(flush_loop(
                table.clone(),
                path.clone(),
                interval,
                rx,
            )))
        };

        info!(
            path = %path.display(),
            interval_secs = interval.as_secs(),
            restore,
            "file store opened"
        );

        Ok(Self {
            table,
            path,
            shutdown,
            flusher: tokio::sync::Mutex::new(flusher),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Save the full table every `interval` until shutdown. A failed tick is
/// logged and superseded by the next one; missed ticks are skipped.
async fn flush_loop(
    table: Arc<MemoryStore>,
    path: PathBuf,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = table.save_metrics(&path).await {
                    warn!(path = %path.display(), error = %e, "scheduled save failed");
                }
            }
            _ = shutdown.changed() => {
                info!("flush loop stopping");
                break;
            }
        }
    }
}

#[async_trait]
impl Store for FileStore {
    async fn update_counter(&self, name: &str, delta: i64) -> StoreResult<()> {
        self.table.update_counter(name, delta).await
    }

    async fn update_gauge(&self, name: &str, value: f64) -> StoreResult<()> {
        self.table.update_gauge(name, value).await
    }

    async fn get_metric(&self, name: &str, kind: MetricKind) -> StoreResult<Option<MetricRecord>> {
        self.table.get_metric(name, kind).await
    }

    async fn get_metrics(&self) -> StoreResult<Snapshot> {
        self.table.get_metrics().await
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn load_metrics(&self, path: &Path) -> StoreResult<()> {
        self.table.load_metrics(path).await
    }

    async fn save_metrics(&self, path: &Path) -> StoreResult<()> {
        self.table.save_metrics(path).await
    }

    async fn close(&self) -> StoreResult<()> {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.flusher.lock().await.take() {
            // Ignore JoinError, the task may already be gone
            let _ = handle.await;
        }
        self.table.save_metrics(&self.path).await?;
        info!(path = %self.path.display(), records = self.table.len(), "file store closed");
        Ok(())
    }
}
