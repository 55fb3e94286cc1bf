//! Response records in the key-value store.

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::kv::KvStore;
use crate::observability::metrics;

/// Lifetime of a record, counted from its last write.
pub const CACHE_TTL_SECS: u64 = 7200;
/// Bodies above this size are never kept.
pub const MAX_CACHED_BODY: usize = 3 * 1024 * 1024;

/// `domain + path + [METHOD]`
pub fn cache_key(domain: &str, path: &str, method: &Method) -> String {
    format!("{}{}[{}]", domain, path, method.as_str())
}

/// A stored response. Without a body it is a pending record and never a hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Base64 of the (possibly gzipped) body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl CacheEntry {
    pub fn pending(status: StatusCode, headers: &HeaderMap) -> Self {
        Self {
            status: status.as_u16(),
            headers: headers
                .iter()
                .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
                .collect(),
            body: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK)
    }

    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in &self.headers {
            if let (Ok(name), Ok(value)) = (HeaderName::try_from(k.as_str()), HeaderValue::try_from(v.as_str())) {
                map.append(name, value);
            }
        }
        map
    }

    /// Set or replace a header, matching names case-insensitively.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_body(&mut self, body: &[u8]) {
        self.body = Some(STANDARD.encode(body));
    }

    /// Decoded body; `None` for pending or corrupt records.
    pub fn body_bytes(&self) -> Option<Vec<u8>> {
        self.body.as_ref().and_then(|b| STANDARD.decode(b).ok())
    }
}

/// Best-effort response cache. Store failures are logged, never raised.
#[derive(Clone)]
pub struct ResponseCache {
    kv: Arc<dyn KvStore>,
}

impl ResponseCache {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// A hit requires a complete record with a body.
    pub async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let raw = match self.kv.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                metrics::record_cache("miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache lookup failed");
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) if entry.body_bytes().is_some() => {
                metrics::record_cache("hit");
                Some(entry)
            }
            Ok(_) => {
                metrics::record_cache("pending");
                None
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Discarding unreadable cache record");
                None
            }
        }
    }

    /// Read a record whether or not it has a body.
    pub async fn read(&self, key: &str) -> Option<CacheEntry> {
        match self.kv.get(key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed");
                None
            }
        }
    }

    pub async fn store(&self, key: &str, entry: &CacheEntry) {
        let raw = match serde_json::to_string(entry) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to encode cache record");
                return;
            }
        };
        if let Err(e) = self.kv.set(key, &raw, Some(CACHE_TTL_SECS)).await {
            tracing::warn!(key = %key, error = %e, "Cache write failed");
        }
    }

    pub async fn evict(&self, key: &str) {
        if let Err(e) = self.kv.del(key).await {
            tracing::warn!(key = %key, error = %e, "Cache eviction failed");
        }
    }
}
