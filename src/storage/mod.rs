//! Metric storage backends.
//!
//! Every backend implements [`Store`]; callers hold an `Arc<dyn Store>` and
//! never see which one is behind it.
//!
//! ```text
//! Store
//!   ├── MemoryStore   : RwLock'd table, also the agent's local buffer
//!   ├── FileStore     : MemoryStore + periodic atomic JSON snapshots
//!   ├── PgStore       : PostgreSQL, transactional upserts, retried
//!   └── RedisStore    : Redis hashes, retried
//! ```

pub mod file;
pub mod memory;
pub mod postgres;
pub mod redis_store;
mod retry;
pub mod snapshot;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::{StoreError, StoreResult};
use crate::model::{MetricKind, MetricRecord, MetricValue, Snapshot};

pub use file::FileStore;
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use redis_store::RedisStore;

/// The operation set shared by every backend. All methods are safe to call
/// from any number of concurrent tasks.
#[async_trait]
pub trait Store: Send + Sync {
    /// `value ← value + delta`, starting from 0. Overflow wraps (two's
    /// complement) rather than saturating.
    async fn update_counter(&self, name: &str, delta: i64) -> StoreResult<()>;

    /// `value ← value`. No range validation; NaN and infinities are stored.
    async fn update_gauge(&self, name: &str, value: f64) -> StoreResult<()>;

    /// `Ok(None)` when the identity was never written.
    async fn get_metric(&self, name: &str, kind: MetricKind) -> StoreResult<Option<MetricRecord>>;

    /// Consistent copy of the whole table.
    async fn get_metrics(&self) -> StoreResult<Snapshot>;

    /// Apply a batch of records with the usual per-kind semantics.
    async fn update_metrics(&self, batch: &[MetricRecord]) -> StoreResult<()> {
        for record in batch {
            self.apply(record).await?;
        }
        Ok(())
    }

    /// Health probe.
    async fn ping(&self) -> StoreResult<()>;

    /// Replace the table with the snapshot stored at `path`.
    async fn load_metrics(&self, path: &Path) -> StoreResult<()>;

    /// Write the whole table to `path`, all or nothing.
    async fn save_metrics(&self, path: &Path) -> StoreResult<()>;

    /// Stop background work, flush, release resources.
    async fn close(&self) -> StoreResult<()>;

    /// Route one record to `update_counter` or `update_gauge`.
    async fn apply(&self, record: &MetricRecord) -> StoreResult<()> {
        match record.value {
            MetricValue::Counter(delta) => self.update_counter(&record.name, delta).await,
            MetricValue::Gauge(value) => self.update_gauge(&record.name, value).await,
        }
    }
}

/// Bound `fut` by `deadline`. On expiry the future is dropped, which for
/// every backend means the effect did not land.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| StoreError::Timeout(deadline))?
}

/// Which backend to build, resolved from configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    Memory,
    File {
        path: PathBuf,
        interval: Duration,
        restore: bool,
    },
    Postgres { dsn: String },
    Redis { url: String },
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File { .. } => "file",
            Self::Postgres { .. } => "postgres",
            Self::Redis { .. } => "redis",
        }
    }

    /// A DSN wins over a file path; a file path wins over pure memory.
    pub fn select(dsn: &str, file_path: &str, interval: Duration, restore: bool) -> Self {
        if !dsn.is_empty() {
            if dsn.starts_with("redis://") || dsn.starts_with("rediss://") {
                Self::Redis { url: dsn.to_owned() }
            } else {
                Self::Postgres { dsn: dsn.to_owned() }
            }
        } else if !file_path.is_empty() {
            Self::File {
                path: PathBuf::from(file_path),
                interval,
                restore,
            }
        } else {
            Self::Memory
        }
    }
}

/// Build the configured backend.
pub async fn open(backend: &Backend) -> StoreResult<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match backend {
        Backend::Memory => Arc::new(MemoryStore::new()),
        Backend::File {
            path,
            interval,
            restore,
        } => Arc::new(FileStore::open(path.clone(), *interval, *restore).await?),
        Backend::Postgres { dsn } => Arc::new(PgStore::connect(dsn).await?),
        Backend::Redis { url } => Arc::new(RedisStore::connect(url).await?),
    };
    info!(backend = backend.name(), "store ready");
    Ok(store)
}
