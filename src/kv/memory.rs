//! In-process key-value store with TTLs and snapshot persistence.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::kv::{KvError, KvStore};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum StoredValue {
    Text(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Record {
    value: StoredValue,
    /// Absolute expiry, unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<u64>,
}

impl Record {
    fn text(value: impl Into<String>) -> Self {
        Self {
            value: StoredValue::Text(value.into()),
            expires_at: None,
        }
    }

    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// A thread-safe TTL map standing in for Redis.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, Record>>,
    persistence_path: Option<PathBuf>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new(persistence_path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            persistence_path,
        }
    }

    /// Load from a snapshot file if it exists, dropping already-expired keys.
    pub async fn load_from_file(path: &Path) -> Result<Self, KvError> {
        let store = Self::new(Some(path.to_path_buf()));
        if tokio::fs::try_exists(path).await? {
            let raw = tokio::fs::read(path).await?;
            let map: HashMap<String, Record> = serde_json::from_slice(&raw)?;
            let now = now_ms();
            for (key, record) in map.into_iter().filter(|(_, r)| !r.is_expired(now)) {
                store.inner.insert(key, record);
            }
            tracing::info!(keys = store.inner.len(), path = %path.display(), "Loaded KV snapshot");
        }
        Ok(store)
    }

    /// Write live keys to the snapshot file.
    pub async fn save_to_file(&self) -> Result<(), KvError> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };
        let now = now_ms();
        let map: HashMap<String, Record> = self
            .inner
            .iter()
            .filter(|r| !r.value().is_expired(now))
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();

        let data = serde_json::to_vec_pretty(&map)?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await?;
        tracing::debug!(keys = map.len(), path = %path.display(), "Saved KV snapshot");
        Ok(())
    }

    /// Remove every expired key.
    pub fn sweep(&self) {
        let now = now_ms();
        self.inner.retain(|_, r| !r.is_expired(now));
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Periodic sweep + snapshot until shutdown, then a final snapshot.
    pub async fn run_maintenance<F>(self, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                    if let Err(e) = self.save_to_file().await {
                        tracing::error!(error = %e, "Failed to save KV snapshot");
                    }
                }
                _ = &mut shutdown => {
                    if let Err(e) = self.save_to_file().await {
                        tracing::error!(error = %e, "Failed to save KV snapshot on shutdown");
                    }
                    break;
                }
            }
        }
    }

    fn purge_expired(&self, key: &str) {
        let now = now_ms();
        self.inner.remove_if(key, |_, r| r.is_expired(now));
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        self.purge_expired(key);
        Ok(self.inner.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        self.purge_expired(key);
        match self.inner.get(key) {
            Some(r) => match &r.value {
                StoredValue::Text(v) => Ok(Some(v.clone())),
                StoredValue::List(_) => Err(KvError::WrongType(key.to_string())),
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), KvError> {
        let mut record = Record::text(value);
        record.expires_at = ttl_secs.map(|ttl| now_ms() + ttl * 1000);
        self.inner.insert(key.to_string(), record);
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        self.purge_expired(key);
        let mut entry = self
            .inner
            .entry(key.to_string())
            .or_insert_with(|| Record::text("0"));
        let StoredValue::Text(current) = &entry.value else {
            return Err(KvError::WrongType(key.to_string()));
        };
        let next = current
            .parse::<i64>()
            .map_err(|_| KvError::NotAnInteger(key.to_string()))?
            + 1;
        entry.value = StoredValue::Text(next.to_string());
        Ok(next)
    }

    async fn expire(&self, key: &str, secs: i64) -> Result<bool, KvError> {
        self.purge_expired(key);
        if secs <= 0 {
            return Ok(self.inner.remove(key).is_some());
        }
        match self.inner.get_mut(key) {
            Some(mut r) => {
                r.expires_at = Some(now_ms() + secs as u64 * 1000);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn del(&self, key: &str) -> Result<bool, KvError> {
        Ok(self.inner.remove(key).is_some())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<i64, KvError> {
        self.purge_expired(key);
        let mut entry = self.inner.entry(key.to_string()).or_insert_with(|| Record {
            value: StoredValue::List(Vec::new()),
            expires_at: None,
        });
        match &mut entry.value {
            StoredValue::List(items) => {
                items.push(value.to_string());
                Ok(items.len() as i64)
            }
            StoredValue::Text(_) => Err(KvError::WrongType(key.to_string())),
        }
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, KvError> {
        self.purge_expired(key);
        let Some(r) = self.inner.get(key) else {
            return Ok(Vec::new());
        };
        let StoredValue::List(items) = &r.value else {
            return Err(KvError::WrongType(key.to_string()));
        };

        let len = items.len() as i64;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start > stop || start >= len {
            return Ok(Vec::new());
        }
        Ok(items[start as usize..=stop as usize].to_vec())
    }

    async fn flush_db(&self) -> Result<(), KvError> {
        self.inner.clear();
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
