//! PostgreSQL backend.
//!
//! One row per identity in `metrics`, primary key `(name, kind)`. Counter
//! increments lock the row inside a transaction, so concurrent deltas to the
//! same identity serialise in the database rather than in this process.
//! Durability belongs to the database, so file load/save are no-ops.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use tracing::{debug, info};

use super::retry::{with_retry, BACKOFF};
use super::{with_deadline, Store};
use crate::error::{StoreError, StoreResult};
use crate::model::{MetricKind, MetricRecord, MetricValue, Snapshot};

/// Upper bound on waiting for a pooled connection.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(1);
/// Upper bound on a health probe round-trip.
const PING_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_CONNECTIONS: u32 = 10;

/// `(name, kind, delta, value)` as selected from `metrics`.
type Row = (String, String, Option<i64>, Option<f64>);

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS metrics (
    name  TEXT NOT NULL,
    kind  TEXT NOT NULL,
    delta BIGINT,
    value DOUBLE PRECISION,
    PRIMARY KEY (name, kind)
)";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect, then create the schema if it is missing.
    pub async fn connect(dsn: &str) -> StoreResult<Self> {
        let pool = with_retry("connect", &BACKOFF, || async move {
            pool_options().connect(dsn).await.map_err(classify)
        })
        .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        info!("postgres store connected");
        Ok(store)
    }

    /// Build a pool that only dials on first use. No schema check.
    pub fn connect_lazy(dsn: &str) -> StoreResult<Self> {
        let pool = pool_options()
            .connect_lazy(dsn)
            .map_err(|e| StoreError::InvalidArgument(format!("database dsn: {e}")))?;
        Ok(Self { pool })
    }

    async fn ensure_schema(&self) -> StoreResult<()> {
        with_retry("ensure_schema", &BACKOFF, || async move {
            sqlx::query(SCHEMA)
                .execute(&self.pool)
                .await
                .map_err(classify)
        })
        .await?;
        debug!("metrics table ready");
        Ok(())
    }

    async fn add_once(&self, name: &str, delta: i64) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        add_counter(&mut *tx, name, delta).await.map_err(classify)?;
        tx.commit().await.map_err(classify)
    }

    async fn set_once(&self, name: &str, value: f64) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await.map_err(classify)?;
        set_gauge(&mut *conn, name, value).await.map_err(classify)
    }

    async fn batch_once(&self, batch: &[MetricRecord]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        for record in batch {
            match record.value {
                MetricValue::Counter(d) => add_counter(&mut *tx, &record.name, d).await,
                MetricValue::Gauge(v) => set_gauge(&mut *tx, &record.name, v).await,
            }
            .map_err(classify)?;
        }
        tx.commit().await.map_err(classify)
    }
}

fn pool_options() -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
}

/// Baseline 0 if absent, lock the row, add with wraparound.
async fn add_counter(conn: &mut PgConnection, name: &str, delta: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO metrics (name, kind, delta) VALUES ($1, 'counter', 0)
         ON CONFLICT (name, kind) DO NOTHING",
    )
    .bind(name)
    .execute(&mut *conn)
    .await?;

    let (current,) = sqlx::query_as::<_, (Option<i64>,)>(
        "SELECT delta FROM metrics WHERE name = $1 AND kind = 'counter' FOR UPDATE",
    )
    .bind(name)
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query("UPDATE metrics SET delta = $2 WHERE name = $1 AND kind = 'counter'")
        .bind(name)
        .bind(current.unwrap_or(0).wrapping_add(delta))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn set_gauge(conn: &mut PgConnection, name: &str, value: f64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO metrics (name, kind, value) VALUES ($1, 'gauge', $2)
         ON CONFLICT (name, kind) DO UPDATE SET value = EXCLUDED.value",
    )
    .bind(name)
    .bind(value)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn decode_row((name, kind, delta, value): Row) -> StoreResult<MetricRecord> {
    let kind: MetricKind = kind
        .parse()
        .map_err(|e| StoreError::CorruptState(format!("row '{name}': {e}")))?;
    let value = match kind {
        MetricKind::Counter => MetricValue::Counter(delta.unwrap_or(0)),
        MetricKind::Gauge => MetricValue::Gauge(
            value.ok_or_else(|| StoreError::CorruptState(format!("gauge '{name}' has no value")))?,
        ),
    };
    Ok(MetricRecord { name, value })
}

/// Sort driver errors into the store taxonomy. Only connection-level and
/// serialization failures are worth retrying.
fn classify(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::BackendUnavailable(e.to_string()),
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            if code.starts_with("08") || matches!(code.as_str(), "40001" | "40P01" | "57P01" | "57P03") {
                StoreError::BackendUnavailable(e.to_string())
            } else {
                StoreError::InvalidArgument(e.to_string())
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::CorruptState(e.to_string())
        }
        _ => StoreError::InvalidArgument(e.to_string()),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn update_counter(&self, name: &str, delta: i64) -> StoreResult<()> {
        with_retry("update_counter", &BACKOFF, || self.add_once(name, delta)).await
    }

    async fn update_gauge(&self, name: &str, value: f64) -> StoreResult<()> {
        with_retry("update_gauge", &BACKOFF, || self.set_once(name, value)).await
    }

    async fn get_metric(&self, name: &str, kind: MetricKind) -> StoreResult<Option<MetricRecord>> {
        let row: Option<Row> =
            with_retry("get_metric", &BACKOFF, || async move {
                sqlx::query_as::<_, Row>(
                    "SELECT name, kind, delta, value FROM metrics WHERE name = $1 AND kind = $2",
                )
                .bind(name)
                .bind(kind.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(classify)
            })
            .await?;
        row.map(decode_row).transpose()
    }

    async fn get_metrics(&self) -> StoreResult<Snapshot> {
        let rows: Vec<Row> =
            with_retry("get_metrics", &BACKOFF, || async move {
                sqlx::query_as::<_, Row>("SELECT name, kind, delta, value FROM metrics")
                    .fetch_all(&self.pool)
                    .await
                    .map_err(classify)
            })
            .await?;
        rows.into_iter()
            .map(|row| decode_row(row).map(|rec| (rec.id(), rec)))
            .collect()
    }

    async fn update_metrics(&self, batch: &[MetricRecord]) -> StoreResult<()> {
        with_retry("update_metrics", &BACKOFF, || self.batch_once(batch)).await
    }

    async fn ping(&self) -> StoreResult<()> {
        let probe = async {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(classify)
        };
        match with_deadline(PING_TIMEOUT, probe).await {
            Err(StoreError::Timeout(d)) => Err(StoreError::BackendUnavailable(format!(
                "no answer within {d:?}"
            ))),
            other => other,
        }
    }

    async fn load_metrics(&self, _path: &Path) -> StoreResult<()> {
        debug!("postgres store keeps its own state, nothing to load");
        Ok(())
    }

    async fn save_metrics(&self, _path: &Path) -> StoreResult<()> {
        debug!("postgres store keeps its own state, nothing to save");
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        self.pool.close().await;
        info!("postgres pool closed");
        Ok(())
    }
}
