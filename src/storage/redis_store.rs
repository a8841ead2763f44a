use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{debug, info};

use super::retry::{with_retry, BACKOFF};
use super::{with_deadline, Store};
use crate::error::{StoreError, StoreResult};
use crate::model::{MetricKind, MetricRecord, Snapshot};

const COUNTERS: &str = "metrics:counter";
const GAUGES: &str = "metrics:gauge";
const PING_TIMEOUT: Duration = Duration::from_secs(1);

/// `HINCRBY` with two's-complement wrap. Redis refuses an overflowing
/// increment, so on that error the add is replayed as a chain of in-range
/// `HINCRBY`s that lands on `value + delta ∓ 2^64`. Every operand stays a
/// decimal string; Lua numbers are doubles and would lose precision.
const WRAPPING_HINCRBY: &str = r"
local r = redis.pcall('HINCRBY', KEYS[1], ARGV[1], ARGV[2])
if type(r) ~= 'table' or not r.err then
  return 0
end
if not string.find(r.err, 'overflow') then
  return r
end
if string.sub(ARGV[2], 1, 1) == '-' then
  redis.call('HINCRBY', KEYS[1], ARGV[1], '9223372036854775807')
  redis.call('HINCRBY', KEYS[1], ARGV[1], '1')
  redis.call('HINCRBY', KEYS[1], ARGV[1], ARGV[2])
  redis.call('HINCRBY', KEYS[1], ARGV[1], '9223372036854775807')
  redis.call('HINCRBY', KEYS[1], ARGV[1], '1')
else
  redis.call('HINCRBY', KEYS[1], ARGV[1], '-9223372036854775808')
  redis.call('HINCRBY', KEYS[1], ARGV[1], ARGV[2])
  redis.call('HINCRBY', KEYS[1], ARGV[1], '-9223372036854775808')
end
return 0
";

/// Redis-backed store: one hash per kind, field = metric name.
///
/// Counter adds run as one server-side script, so they stay atomic and wrap
/// on overflow like every other backend.
pub struct RedisStore {
    /// Cheaply cloneable; every clone shares one multiplexed connection
    /// that reconnects on failure.
    conn: ConnectionManager,
    add_counter: Script,
}

impl RedisStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::InvalidArgument(format!("redis url: {e}")))?;

        let client = &client;
        let conn = with_retry("connect", &BACKOFF, || async move {
            ConnectionManager::new(client.clone()).await.map_err(classify)
        })
        .await?;

        info!("redis store connected");
        Ok(Self {
            conn,
            add_counter: Script::new(WRAPPING_HINCRBY),
        })
    }
}

fn classify(e: redis::RedisError) -> StoreError {
    if e.is_io_error()
        || e.is_connection_dropped()
        || e.is_connection_refusal()
        || e.is_timeout()
        || matches!(
            e.kind(),
            redis::ErrorKind::TryAgain | redis::ErrorKind::BusyLoadingError
        )
    {
        StoreError::BackendUnavailable(e.to_string())
    } else {
        StoreError::InvalidArgument(e.to_string())
    }
}

fn parse_gauge(name: &str, raw: &str) -> StoreResult<f64> {
    raw.parse()
        .map_err(|_| StoreError::CorruptState(format!("gauge '{name}' holds '{raw}'")))
}

#[async_trait]
impl Store for RedisStore {
    async fn update_counter(&self, name: &str, delta: i64) -> StoreResult<()> {
        with_retry("update_counter", &BACKOFF, || async move {
            let mut conn = self.conn.clone();
            let _: i64 = self
                .add_counter
                .key(COUNTERS)
                .arg(name)
                .arg(delta)
                .invoke_async(&mut conn)
                .await
                .map_err(classify)?;
            Ok(())
        })
        .await
    }

    async fn update_gauge(&self, name: &str, value: f64) -> StoreResult<()> {
        with_retry("update_gauge", &BACKOFF, || async move {
            let mut conn = self.conn.clone();
            let _: () = conn
                .hset(GAUGES, name, value.to_string())
                .await
                .map_err(classify)?;
            Ok(())
        })
        .await
    }

    async fn get_metric(&self, name: &str, kind: MetricKind) -> StoreResult<Option<MetricRecord>> {
        let key = match kind {
            MetricKind::Counter => COUNTERS,
            MetricKind::Gauge => GAUGES,
        };
        let raw: Option<String> = with_retry("get_metric", &BACKOFF, || async move {
            let mut conn = self.conn.clone();
            let raw: Option<String> = conn.hget(key, name).await.map_err(classify)?;
            Ok(raw)
        })
        .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        let record = match kind {
            MetricKind::Counter => MetricRecord::counter(
                name,
                raw.parse().map_err(|_| {
                    StoreError::CorruptState(format!("counter '{name}' holds '{raw}'"))
                })?,
            ),
            MetricKind::Gauge => MetricRecord::gauge(name, parse_gauge(name, &raw)?),
        };
        Ok(Some(record))
    }

    async fn get_metrics(&self) -> StoreResult<Snapshot> {
        // MULTI/EXEC so both hashes come from the same instant
        let (counters, gauges) = with_retry("get_metrics", &BACKOFF, || async move {
            let mut conn = self.conn.clone();
            let hashes: (HashMap<String, i64>, HashMap<String, String>) = redis::pipe()
                .atomic()
                .hgetall(COUNTERS)
                .hgetall(GAUGES)
                .query_async(&mut conn)
                .await
                .map_err(classify)?;
            Ok(hashes)
        })
        .await?;

        let mut snap = Snapshot::new();
        for (name, value) in counters {
            let rec = MetricRecord::counter(name, value);
            snap.insert(rec.id(), rec);
        }
        for (name, raw) in gauges {
            let rec = MetricRecord::gauge(name.clone(), parse_gauge(&name, &raw)?);
            snap.insert(rec.id(), rec);
        }
        Ok(snap)
    }

    async fn ping(&self) -> StoreResult<()> {
        let probe = async {
            let mut conn = self.conn.clone();
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(classify)?;
            Ok(())
        };
        match with_deadline(PING_TIMEOUT, probe).await {
            Err(StoreError::Timeout(d)) => Err(StoreError::BackendUnavailable(format!(
                "no answer within {d:?}"
            ))),
            other => other,
        }
    }

    async fn load_metrics(&self, _path: &Path) -> StoreResult<()> {
        debug!("redis store keeps its own state, nothing to load");
        Ok(())
    }

    async fn save_metrics(&self, _path: &Path) -> StoreResult<()> {
        debug!("redis store keeps its own state, nothing to save");
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        // the connection manager closes when its last clone drops
        Ok(())
    }
}
