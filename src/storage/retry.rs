use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::StoreResult;

/// Pause before each retry of a transient failure. Its length bounds the
/// number of retries.
pub(crate) const BACKOFF: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(300),
    Duration::from_millis(500),
];

/// Run `op`, retrying while it fails with a transient error.
///
/// Non-transient errors and the last transient error are returned as is.
pub(crate) async fn with_retry<T, F, Fut>(what: &str, backoff: &[Duration], mut op: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut delays = backoff.iter();
    loop {
        match op().await {
            Err(e) if e.is_transient() => match delays.next() {
                Some(delay) => {
                    warn!(op = what, error = %e, retry_in_ms = delay.as_millis() as u64, "transient backend failure");
                    tokio::time::sleep(*delay).await;
                }
                None => return Err(e),
            },
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    const FAST: [Duration; 3] = [Duration::from_millis(1); 3];

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let res = with_retry("test", &FAST, || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StoreError::BackendUnavailable("down".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(res.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_backoff_is_exhausted() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let res: StoreResult<()> = with_retry("test", &FAST, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::BackendUnavailable("down".into()))
        })
        .await;
        assert!(matches!(res, Err(StoreError::BackendUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn invalid_arguments_fail_fast() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let res: StoreResult<()> = with_retry("test", &FAST, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::InvalidArgument("bad".into()))
        })
        .await;
        assert!(matches!(res, Err(StoreError::InvalidArgument(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
