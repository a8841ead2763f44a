use std::io::Write;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use tracing::debug;

use crate::error::StoreError;
use crate::model::Metrics;
use crate::storage::Store;

/// Upper bound on one delivery round-trip.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("reading local buffer: {0}")]
    Store(#[from] StoreError),

    #[error("encoding batch: {0}")]
    Encode(String),

    #[error("sending batch: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server answered {0}")]
    Status(reqwest::StatusCode),
}

/// Pushes the full contents of a store to the server's `/updates/`
/// endpoint as one request. Delivery is all or nothing and never touches
/// the store, so a failed cycle is simply repeated with fresher data.
pub struct Reporter {
    client: reqwest::Client,
    url: String,
    compress: bool,
}

impl Reporter {
    pub fn new(address: &str, compress: bool) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder().timeout(SEND_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: format!("http://{address}/updates/"),
            compress,
        })
    }

    /// Send the current snapshot of `store`. Returns how many records went
    /// out; an empty buffer sends nothing.
    pub async fn report(&self, store: &dyn Store) -> Result<usize, ReportError> {
        let snapshot = store.get_metrics().await?;
        if snapshot.is_empty() {
            return Ok(0);
        }

        let batch: Vec<Metrics> = snapshot.values().map(Metrics::from).collect();
        let json = serde_json::to_vec(&batch).map_err(|e| ReportError::Encode(e.to_string()))?;

        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        request = if self.compress {
            request
                .header(reqwest::header::CONTENT_ENCODING, "gzip")
                .body(gzip(&json)?)
        } else {
            request.body(json)
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ReportError::Status(response.status()));
        }

        debug!(records = batch.len(), url = %self.url, "batch delivered");
        Ok(batch.len())
    }
}

fn gzip(data: &[u8]) -> Result<Vec<u8>, ReportError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| ReportError::Encode(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| ReportError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn gzip_round_trips() {
        let packed = gzip(br#"[{"id":"a","type":"counter","delta":1}]"#).unwrap();
        let mut out = String::new();
        GzDecoder::new(packed.as_slice()).read_to_string(&mut out).unwrap();
        assert_eq!(out, r#"[{"id":"a","type":"counter","delta":1}]"#);
    }

    #[tokio::test]
    async fn empty_buffer_sends_nothing() {
        // nothing listens here; an attempted send would fail
        let reporter = Reporter::new("127.0.0.1:1", true).unwrap();
        assert_eq!(reporter.report(&MemoryStore::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_delivery_leaves_buffer_intact() {
        let store = MemoryStore::new();
        store.update_counter("PollCount", 4).await.unwrap();

        let reporter = Reporter::new("127.0.0.1:1", true).unwrap();
        assert!(matches!(
            reporter.report(&store).await,
            Err(ReportError::Transport(_))
        ));
        assert_eq!(store.len(), 1);
    }
}
