use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::{snapshot, Store};
use crate::error::{StoreError, StoreResult};
use crate::model::{MetricId, MetricKind, MetricRecord, MetricValue, Snapshot};

// ─── Public types ────────────────────────────────────────────────

/// Thread-safe in-process metric table.
///
/// Writers take the exclusive guard for a single map operation; snapshots
/// copy every record out under the shared guard, so no reader ever sees a
/// half-applied update. The guard is never held across an `.await`.
pub struct MemoryStore {
    table: RwLock<HashMap<MetricId, MetricValue>>,
    /// Serialises `save_metrics` so two saves never interleave on one file.
    save_lock: tokio::sync::Mutex<()>,
}

// ─── MemoryStore impl ────────────────────────────────────────────

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    fn add(&self, name: &str, delta: i64) {
        let mut table = self.table.write();
        let slot = table
            .entry(MetricId::new(name, MetricKind::Counter))
            .or_insert(MetricValue::Counter(0));
        if let MetricValue::Counter(v) = slot {
            *v = v.wrapping_add(delta);
        }
    }

    fn set(&self, name: &str, value: f64) {
        self.table
            .write()
            .insert(MetricId::new(name, MetricKind::Gauge), MetricValue::Gauge(value));
    }

    fn lookup(&self, name: &str, kind: MetricKind) -> Option<MetricRecord> {
        let key = MetricId::new(name, kind);
        self.table.read().get(&key).map(|value| MetricRecord {
            name: key.name.clone(),
            value: *value,
        })
    }

    /// Copy the whole table out under the read guard.
    pub fn snapshot(&self) -> Snapshot {
        let table = self.table.read();
        table
            .iter()
            .map(|(id, value)| {
                (
                    id.clone(),
                    MetricRecord {
                        name: id.name.clone(),
                        value: *value,
                    },
                )
            })
            .collect()
    }

    /// Swap the whole table for `records` in one step. Later duplicates win.
    pub fn replace(&self, records: Vec<MetricRecord>) {
        let fresh: HashMap<MetricId, MetricValue> = records
            .into_iter()
            .map(|r| (r.id(), r.value))
            .collect();
        *self.table.write() = fresh;
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn update_counter(&self, name: &str, delta: i64) -> StoreResult<()> {
        self.add(name, delta);
        Ok(())
    }

    async fn update_gauge(&self, name: &str, value: f64) -> StoreResult<()> {
        self.set(name, value);
        Ok(())
    }

    async fn get_metric(&self, name: &str, kind: MetricKind) -> StoreResult<Option<MetricRecord>> {
        Ok(self.lookup(name, kind))
    }

    async fn get_metrics(&self) -> StoreResult<Snapshot> {
        Ok(self.snapshot())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn load_metrics(&self, path: &Path) -> StoreResult<()> {
        match snapshot::read(path).await {
            Ok(records) => {
                let count = records.len();
                self.replace(records);
                info!(path = %path.display(), records = count, "metrics restored");
                Ok(())
            }
            Err(StoreError::NotFound(_)) => {
                info!(path = %path.display(), "no snapshot to restore, starting empty");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn save_metrics(&self, path: &Path) -> StoreResult<()> {
        let _guard = self.save_lock.lock().await;
        let snap = self.snapshot();
        snapshot::write_atomic(path, &snap).await?;
        debug!(path = %path.display(), records = snap.len(), "metrics saved");
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn first_counter_update_starts_from_zero() {
        let store = MemoryStore::new();
        store.update_counter("PollCount", 1).await.unwrap();

        let got = store.get_metric("PollCount", MetricKind::Counter).await.unwrap();
        assert_eq!(got, Some(MetricRecord::counter("PollCount", 1)));
    }

    #[tokio::test]
    async fn gauge_keeps_last_write() {
        let store = MemoryStore::new();
        store.update_gauge("Alloc", 42.5).await.unwrap();
        store.update_gauge("Alloc", 10.0).await.unwrap();

        let got = store.get_metric("Alloc", MetricKind::Gauge).await.unwrap();
        assert_eq!(got, Some(MetricRecord::gauge("Alloc", 10.0)));
    }

    #[tokio::test]
    async fn unknown_identity_is_none() {
        let store = MemoryStore::new();
        store.update_gauge("Alloc", 1.0).await.unwrap();
        assert_eq!(store.get_metric("Alloc", MetricKind::Counter).await.unwrap(), None);
        assert_eq!(store.get_metric("Missing", MetricKind::Gauge).await.unwrap(), None);
    }

    #[tokio::test]
    async fn counter_overflow_wraps() {
        let store = MemoryStore::new();
        store.update_counter("c", i64::MAX).await.unwrap();
        store.update_counter("c", 1).await.unwrap();
        let got = store.get_metric("c", MetricKind::Counter).await.unwrap().unwrap();
        assert_eq!(got.value, MetricValue::Counter(i64::MIN));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_never_lost() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for worker in 0..8i64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..1_000i64 {
                    let delta = if i % 2 == 0 { worker + 1 } else { -1 };
                    store.update_counter("hits", delta).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // each worker: 500 × (worker + 1) − 500
        let expected: i64 = (0..8i64).map(|w| 500 * (w + 1) - 500).sum();
        let got = store.get_metric("hits", MetricKind::Counter).await.unwrap().unwrap();
        assert_eq!(got.value, MetricValue::Counter(expected));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn snapshots_never_show_torn_values() {
        let store = Arc::new(MemoryStore::new());
        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 1..=2_000i64 {
                    store.update_counter("seq", 1).await.unwrap();
                    store.update_gauge("seq", i as f64).await.unwrap();
                }
            })
        };

        let mut last_counter = 0;
        while !writer.is_finished() {
            let snap = store.get_metrics().await.unwrap();
            if let Some(rec) = snap.get(&MetricId::new("seq", MetricKind::Counter)) {
                let MetricValue::Counter(c) = rec.value else {
                    panic!("kind changed")
                };
                assert!(c >= last_counter && c <= 2_000);
                last_counter = c;
            }
            if let Some(rec) = snap.get(&MetricId::new("seq", MetricKind::Gauge)) {
                let MetricValue::Gauge(g) = rec.value else {
                    panic!("kind changed")
                };
                assert!(g.fract() == 0.0 && (1.0..=2_000.0).contains(&g));
            }
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn returned_snapshot_is_a_copy() {
        let store = MemoryStore::new();
        store.update_counter("c", 5).await.unwrap();

        let mut snap = store.get_metrics().await.unwrap();
        for rec in snap.values_mut() {
            rec.value = MetricValue::Counter(999);
        }

        let got = store.get_metric("c", MetricKind::Counter).await.unwrap().unwrap();
        assert_eq!(got.value, MetricValue::Counter(5));
    }

    #[tokio::test]
    async fn same_name_in_both_kinds() {
        let store = MemoryStore::new();
        store.update_counter("x", 2).await.unwrap();
        store.update_gauge("x", 0.5).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn save_then_load_reproduces_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let original = MemoryStore::new();
        original.update_counter("PollCount", 7).await.unwrap();
        original.update_gauge("Alloc", 42.5).await.unwrap();
        original.update_gauge("Weird", f64::NEG_INFINITY).await.unwrap();
        original.save_metrics(&path).await.unwrap();

        let restored = MemoryStore::new();
        restored.load_metrics(&path).await.unwrap();
        assert_eq!(
            restored.get_metrics().await.unwrap(),
            original.get_metrics().await.unwrap()
        );
    }

    #[tokio::test]
    async fn load_without_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        store.load_metrics(&dir.path().join("nope.json")).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn corrupt_load_keeps_existing_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let store = MemoryStore::new();
        store.update_counter("c", 1).await.unwrap();
        let err = store.load_metrics(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::CorruptState(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_saves_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let store = Arc::new(MemoryStore::new());
        for i in 0..50 {
            store.update_gauge(&format!("g{i}"), i as f64).await.unwrap();
        }

        let saves: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let path = path.clone();
                tokio::spawn(async move { store.save_metrics(&path).await })
            })
            .collect();
        for s in saves {
            s.await.unwrap().unwrap();
        }

        let restored = MemoryStore::new();
        restored.load_metrics(&path).await.unwrap();
        assert_eq!(restored.len(), 50);
    }
}
