//! Counter/gauge telemetry: a storage engine with interchangeable backends,
//! the HTTP server that fronts it, and the agent that feeds it.

use std::sync::Arc;
use std::time::Duration;

pub mod agent;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod model;
pub mod server;
pub mod storage;

pub use error::{StoreError, StoreResult};
pub use storage::Store;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// The one store of this process, whatever its backend.
    pub store: Arc<dyn Store>,

    /// Deadline applied to every store call made on behalf of a request.
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, request_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            store,
            request_timeout,
        })
    }
}
