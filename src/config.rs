//! Command-line flags with environment fallbacks. An environment variable
//! overrides the built-in default; an explicit flag overrides both.

use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::storage::Backend;

#[derive(Debug, Clone, Parser)]
#[command(name = "server", about = "Metrics server: accepts, stores and serves counters and gauges")]
pub struct ServerConfig {
    /// Address to listen on.
    #[arg(short = 'a', long, env = "ADDRESS", default_value = "localhost:8080")]
    pub address: String,

    /// Seconds between snapshot saves; 0 saves only on shutdown.
    #[arg(short = 'i', long, env = "STORE_INTERVAL", default_value_t = 300)]
    pub store_interval: u64,

    /// Snapshot file. Empty keeps metrics in memory only.
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH", default_value = "/tmp/metrics-db.json")]
    pub file_storage_path: String,

    /// Restore the table from the snapshot file at startup.
    #[arg(
        short = 'r',
        long,
        env = "RESTORE",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub restore: bool,

    /// `postgres://…` or `redis://…`. Takes precedence over the file.
    #[arg(short = 'd', long, env = "DATABASE_DSN", default_value = "")]
    pub database_dsn: String,

    /// Deadline for each store call made on behalf of a request.
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 1000)]
    pub request_timeout_ms: u64,
}

impl ServerConfig {
    pub fn backend(&self) -> Backend {
        Backend::select(
            &self.database_dsn,
            &self.file_storage_path,
            Duration::from_secs(self.store_interval),
            self.restore,
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "agent", about = "Metrics agent: samples runtime values and pushes them to the server")]
pub struct AgentConfig {
    /// Server address, `host:port`.
    #[arg(short = 'a', long, env = "ADDRESS", default_value = "localhost:8080")]
    pub address: String,

    /// Seconds between samples.
    #[arg(short = 'p', long, env = "POLL_INTERVAL", default_value_t = 2)]
    pub poll_interval: u64,

    /// Seconds between pushes of the full buffer.
    #[arg(short = 'r', long, env = "REPORT_INTERVAL", default_value_t = 10)]
    pub report_interval: u64,

    /// Send batches as plain JSON instead of gzip.
    #[arg(long, env = "NO_COMPRESS")]
    pub no_compress: bool,
}

impl AgentConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval.max(1))
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval.max(1))
    }
}
