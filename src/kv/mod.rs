//! Key-value store subsystem.
//!
//! # Data Flow
//! ```text
//! startup:
//!     kv::connect(config)
//!         → redis.rs (remote store, ConnectionManager)
//!         → on failure: memory.rs (in-process TTL map + JSON snapshot)
//!
//! runtime:
//!     rate counters, response cache, request statistics
//!         → Arc<dyn KvStore>
//! ```
//!
//! # Design Decisions
//! - One trait, two backends, selected once at startup
//! - Values are strings (counters are decimal strings, as in Redis)
//! - TTL expiry is equivalent to deleting the key
//! - Callers treat the store as best-effort where documented

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::KvConfig;
use crate::events::{Event, EventBus};
use crate::lifecycle::Shutdown;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Errors raised by a key-value backend.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Value at '{0}' is not an integer")]
    NotAnInteger(String),

    #[error("Operation against a key holding the wrong kind of value: '{0}'")]
    WrongType(String),

    #[error("Snapshot IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Redis-compatible key-value contract used by the serving pipeline.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, KvError>;

    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Set a value; `ttl_secs` of `None` clears any previous expiry.
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), KvError>;

    /// Increment an integer value, creating it at 0 first. Keeps the TTL.
    async fn incr(&self, key: &str) -> Result<i64, KvError>;

    /// Set a TTL. Non-positive values delete the key. Returns false if missing.
    async fn expire(&self, key: &str, secs: i64) -> Result<bool, KvError>;

    async fn del(&self, key: &str) -> Result<bool, KvError>;

    async fn rpush(&self, key: &str, value: &str) -> Result<i64, KvError>;

    /// Inclusive range with Redis index semantics (negative = from the end).
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, KvError>;

    async fn flush_db(&self) -> Result<(), KvError>;

    /// Backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Select a backend: Redis when reachable, otherwise the in-process store.
///
/// The memory store's sweep/snapshot task is tracked by `shutdown`, which waits for its final snapshot.
pub async fn connect(config: &KvConfig, events: &EventBus, shutdown: &Shutdown) -> Arc<dyn KvStore> {
    if let Some(url) = config.url.as_deref().filter(|u| !u.is_empty()) {
        let timeout = Duration::from_secs(config.connect_timeout_secs);
        match RedisStore::connect(url, timeout).await {
            Ok(store) => {
                tracing::info!(url = %url, "Connected to external Redis");
                return Arc::new(store);
            }
            Err(e) => {
                tracing::error!(url = %url, error = %e, "Redis connection failed. Switching to fallback mode");
                events.emit(&Event::KvFallback { reason: e.to_string() });
            }
        }
    }

    let store = match &config.snapshot_path {
        Some(path) => MemoryStore::load_from_file(path).await.unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Failed to load KV snapshot, starting empty");
            MemoryStore::new(Some(path.clone()))
        }),
        None => MemoryStore::new(None),
    };

    let interval = Duration::from_secs(config.snapshot_interval_secs.max(1));
    shutdown.spawn_task(store.clone().run_maintenance(interval, shutdown.signal()));
    Arc::new(store)
}
