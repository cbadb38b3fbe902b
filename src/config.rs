//! Store configuration.
//!
//! Supports:
//! - CLI arguments via clap (flattened into front ends)
//! - Environment variable overrides
//! - Sensible defaults for quick start

use clap::Args;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Connection, worker and streaming settings for a [`Store`](crate::Store).
#[derive(Args, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    #[arg(long = "db", env = "CRUDSTREAM_DB_PATH", default_value = "./crudstream.db")]
    pub db_path: PathBuf,

    /// Maximum pooled connections
    #[arg(long, env = "CRUDSTREAM_POOL_SIZE", default_value_t = 8)]
    pub pool_size: u32,

    /// How long a connection waits on a locked database, in milliseconds
    #[arg(long, env = "CRUDSTREAM_BUSY_TIMEOUT_MS", default_value_t = 5000)]
    pub busy_timeout_ms: u64,

    /// Maximum concurrently running workers (0 = unbounded)
    #[arg(long, env = "CRUDSTREAM_WORKER_LIMIT", default_value_t = 0)]
    pub worker_limit: usize,

    /// Rows buffered between a worker and its consumer
    #[arg(long, env = "CRUDSTREAM_STREAM_BUFFER", default_value_t = 64)]
    pub stream_buffer: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

impl StoreConfig {
    /// Configuration for a database at `db_path` with all other defaults.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    /// Create a small configuration for testing.
    pub fn test_config(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            pool_size: 4,
            busy_timeout_ms: 1000,
            worker_limit: 4,
            stream_buffer: 4,
            log_level: "debug".into(),
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./crudstream.db"),
            pool_size: 8,
            busy_timeout_ms: 5000,
            worker_limit: 0,
            stream_buffer: 64,
            log_level: "info".into(),
        }
    }
}
