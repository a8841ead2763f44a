//! On-disk snapshot format: one JSON array of [`Metrics`] holding the whole
//! table. Read wholly on load, written wholly on save.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::model::{MetricRecord, Metrics, Snapshot};

/// Read and validate a snapshot file.
///
/// A missing file is `NotFound`; anything that does not parse into valid
/// records is `CorruptState`.
pub async fn read(path: &Path) -> StoreResult<Vec<MetricRecord>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(StoreError::NotFound(path.display().to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    let wire: Vec<Metrics> = serde_json::from_slice(&bytes)
        .map_err(|e| StoreError::CorruptState(format!("{}: {e}", path.display())))?;

    wire.into_iter()
        .map(|m| {
            MetricRecord::try_from(m)
                .map_err(|e| StoreError::CorruptState(format!("{}: {e}", path.display())))
        })
        .collect()
}

/// Write `snapshot` to `path` so that a reader only ever sees the previous
/// or the new document: write a sibling temp file, fsync, rename over.
pub async fn write_atomic(path: &Path, snapshot: &Snapshot) -> StoreResult<()> {
    let wire: Vec<Metrics> = snapshot.values().map(Metrics::from).collect();
    let body = serde_json::to_vec(&wire)
        .map_err(|e| StoreError::InvalidArgument(format!("encode snapshot: {e}")))?;

    let dir = path.parent().filter(|d| !d.as_os_str().is_empty());
    if let Some(dir) = dir {
        tokio::fs::create_dir_all(dir).await?;
    }

    let tmp = temp_path(path);
    let mut file = tokio::fs::File::create(&tmp).await?;
    let written = async {
        file.write_all(&body).await?;
        file.sync_all().await
    }
    .await;
    drop(file);

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    // persist the directory entry so the rename survives a crash
    #[cfg(unix)]
    if let Some(dir) = dir {
        tokio::fs::File::open(dir).await?.sync_all().await?;
    }

    debug!(path = %path.display(), records = wire.len(), "snapshot written");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("metrics"));
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read(&dir.path().join("absent.json")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        tokio::fs::write(&path, b"[{\"id\":\"a\",\"type\":").await.unwrap();
        assert!(matches!(read(&path).await, Err(StoreError::CorruptState(_))));

        tokio::fs::write(&path, br#"[{"id":"a","type":"counter"}]"#).await.unwrap();
        assert!(matches!(read(&path).await, Err(StoreError::CorruptState(_))));
    }

    #[tokio::test]
    async fn write_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("m.json");

        let mut snap = Snapshot::new();
        let rec = MetricRecord::counter("PollCount", 3);
        snap.insert(rec.id(), rec.clone());
        write_atomic(&path, &snap).await.unwrap();

        assert_eq!(read(&path).await.unwrap(), vec![rec]);
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn failed_rename_cleans_up_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // a non-empty directory where the snapshot should go
        let path = dir.path().join("m.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupant"), b"x").unwrap();

        let mut snap = Snapshot::new();
        let rec = MetricRecord::gauge("Alloc", 1.5);
        snap.insert(rec.id(), rec);

        assert!(write_atomic(&path, &snap).await.is_err());
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn readers_never_see_a_partial_snapshot() {
        use crate::storage::{MemoryStore, Store};
        use std::sync::Arc;

        const RECORDS: usize = 3000;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");

        let table = Arc::new(MemoryStore::new());
        for i in 0..RECORDS {
            table.update_gauge(&format!("g{i}"), i as f64 * 0.5).await.unwrap();
        }

        let writer = {
            let table = table.clone();
            let path = path.clone();
            tokio::spawn(async move {
                for _ in 0..40 {
                    table.save_metrics(&path).await.unwrap();
                }
            })
        };

        while !writer.is_finished() {
            match read(&path).await {
                Ok(records) => assert_eq!(records.len(), RECORDS),
                Err(StoreError::NotFound(_)) => {}
                Err(e) => panic!("reader saw a broken snapshot: {e}"),
            }
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        assert_eq!(read(&path).await.unwrap().len(), RECORDS);
    }
}
