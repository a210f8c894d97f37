//! Configuration for the datastore
//!
//! CLI arguments and environment variable handling using clap.
//! Hosts embedding the library can `#[command(flatten)]` this into their own
//! argument struct or build it with `StoreConfig::default()`.

use clap::Parser;

/// Default connection endpoint used when `MONGODB_URI` is unset
pub const DEFAULT_MONGODB_URI: &str = "mongodb://localhost:27017";

/// Default database name
pub const DEFAULT_DB_NAME: &str = "datastore";

/// Default queue collection (bounded log)
pub const DEFAULT_QUEUE_COLLECTION: &str = "sysqueue";

/// Default key-value collection
pub const DEFAULT_KV_COLLECTION: &str = "syskeyvaldata";

/// Default byte cap of the queue log (1 MiB)
pub const DEFAULT_QUEUE_MAX_BYTES: u64 = 1024 * 1024;

/// Datastore adapter settings
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "datastore-worker")]
#[command(about = "Queue worker for the MongoDB datastore adapter")]
pub struct StoreConfig {
    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = DEFAULT_MONGODB_URI)]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = DEFAULT_DB_NAME)]
    pub mongodb_db: String,

    /// Collection holding the bounded queue log
    #[arg(long, env = "QUEUE_COLLECTION", default_value = DEFAULT_QUEUE_COLLECTION)]
    pub queue_collection: String,

    /// Size cap of the queue log in bytes; oldest records are evicted past it
    #[arg(long, env = "QUEUE_MAX_BYTES", default_value_t = DEFAULT_QUEUE_MAX_BYTES)]
    pub queue_max_bytes: u64,

    /// Collection holding key-value records
    #[arg(long, env = "KV_COLLECTION", default_value = DEFAULT_KV_COLLECTION)]
    pub kv_collection: String,

    /// Server selection / connect timeout in milliseconds
    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value = "3000")]
    pub connect_timeout_ms: u64,

    /// Delay before re-opening a queue tail cursor the store closed
    #[arg(long, env = "TAIL_RETRY_MS", default_value = "1000")]
    pub tail_retry_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines instead of human-readable text
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            mongodb_uri: DEFAULT_MONGODB_URI.to_string(),
            mongodb_db: DEFAULT_DB_NAME.to_string(),
            queue_collection: DEFAULT_QUEUE_COLLECTION.to_string(),
            queue_max_bytes: DEFAULT_QUEUE_MAX_BYTES,
            kv_collection: DEFAULT_KV_COLLECTION.to_string(),
            connect_timeout_ms: 3000,
            tail_retry_ms: 1000,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl StoreConfig {
    /// Config pointing at the given endpoint, falling back to the local default
    pub fn with_uri(uri: Option<&str>) -> Self {
        let mut config = Self::default();
        if let Some(uri) = uri.filter(|u| !u.trim().is_empty()) {
            config.mongodb_uri = uri.to_string();
        }
        config
    }

    /// Connection URI with driver timeouts appended
    pub fn timeout_uri(&self) -> String {
        let params = format!(
            "serverSelectionTimeoutMS={}&connectTimeoutMS={}",
            self.connect_timeout_ms, self.connect_timeout_ms
        );
        if self.mongodb_uri.contains('?') {
            format!("{}&{}", self.mongodb_uri, params)
        } else if self.mongodb_uri.ends_with('/') {
            format!("{}?{}", self.mongodb_uri, params)
        } else {
            format!("{}/?{}", self.mongodb_uri, params)
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.mongodb_uri.trim().is_empty() {
            return Err("MONGODB_URI must not be empty".to_string());
        }
        if self.mongodb_db.trim().is_empty() {
            return Err("MONGODB_DB must not be empty".to_string());
        }
        if self.queue_collection.is_empty() || self.kv_collection.is_empty() {
            return Err("collection names must not be empty".to_string());
        }
        if self.queue_collection == self.kv_collection {
            return Err("QUEUE_COLLECTION and KV_COLLECTION must differ".to_string());
        }
        if self.queue_max_bytes == 0 {
            return Err("QUEUE_MAX_BYTES must be greater than zero".to_string());
        }
        Ok(())
    }
}
