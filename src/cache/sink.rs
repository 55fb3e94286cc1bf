//! Response writers, with a caching decorator.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;

use crate::cache::compression::maybe_gzip;
use crate::cache::store::{CacheEntry, ResponseCache, MAX_CACHED_BODY};

/// Something a complete response can be written to: headers first, then the body.
#[async_trait]
pub trait ResponseSink: Send {
    async fn write_header(&mut self, status: StatusCode, headers: HeaderMap);
    async fn write_body(&mut self, body: Bytes);
    fn into_response(self) -> Response
    where
        Self: Sized;
}

/// Collects a response in memory.
#[derive(Debug, Default)]
pub struct BufferedSink {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResponseSink for BufferedSink {
    async fn write_header(&mut self, status: StatusCode, headers: HeaderMap) {
        self.status = status;
        self.headers = headers;
    }

    async fn write_body(&mut self, body: Bytes) {
        self.body = body;
    }

    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Records everything written through it under one cache key.
///
/// The header write only records a pending entry; headers reach the inner
/// sink together with the body, since compression may still change them.
pub struct CachingSink<S> {
    inner: S,
    cache: ResponseCache,
    key: String,
    status: StatusCode,
    headers: HeaderMap,
}

impl<S: ResponseSink> CachingSink<S> {
    pub fn new(inner: S, cache: ResponseCache, key: impl Into<String>) -> Self {
        Self {
            inner,
            cache,
            key: key.into(),
            status: StatusCode::OK,
            headers: HeaderMap::new(),
        }
    }
}

#[async_trait]
impl<S: ResponseSink> ResponseSink for CachingSink<S> {
    async fn write_header(&mut self, status: StatusCode, headers: HeaderMap) {
        let entry = CacheEntry::pending(status, &headers);
        self.cache.store(&self.key, &entry).await;
        self.status = status;
        self.headers = headers;
    }

    async fn write_body(&mut self, body: Bytes) {
        let mut entry = match self.cache.read(&self.key).await {
            Some(entry) => entry,
            None => CacheEntry::pending(self.status, &self.headers),
        };

        let content_type = self
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        let mut headers = entry.header_map();
        let body = match maybe_gzip(content_type, &body) {
            Some(compressed) => {
                entry.set_header(CONTENT_ENCODING.as_str(), "gzip");
                headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                Bytes::from(compressed)
            }
            None => body,
        };
        headers.remove(CONTENT_LENGTH);

        self.inner.write_header(entry.status(), headers).await;
        self.inner.write_body(body.clone()).await;

        if body.is_empty() {
            return;
        }
        if body.len() > MAX_CACHED_BODY {
            self.cache.evict(&self.key).await;
            return;
        }
        entry.set_body(&body);
        self.cache.store(&self.key, &entry).await;
    }

    fn into_response(self) -> Response {
        self.inner.into_response()
    }
}

/// Replay a cached entry.
pub fn cached_response(entry: &CacheEntry) -> Option<Response> {
    let body = entry.body_bytes()?;
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = entry.status();
    *response.headers_mut() = entry.header_map();
    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvStore, MemoryStore};
    use std::sync::Arc;

    fn text_headers(content_type: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers
    }

    async fn write(cache: &ResponseCache, key: &str, content_type: &'static str, body: Vec<u8>) -> Response {
        let mut sink = CachingSink::new(BufferedSink::new(), cache.clone(), key);
        sink.write_header(StatusCode::OK, text_headers(content_type)).await;
        sink.write_body(Bytes::from(body)).await;
        sink.into_response()
    }

    #[tokio::test]
    async fn test_small_body_cached_plain() {
        let cache = ResponseCache::new(Arc::new(MemoryStore::new(None)));
        let response = write(&cache, "k", "text/plain", b"hello".to_vec()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(CONTENT_ENCODING).is_none());

        let entry = cache.lookup("k").await.unwrap();
        assert_eq!(entry.body_bytes().unwrap(), b"hello");
        let replay = cached_response(&entry).unwrap();
        assert_eq!(replay.headers().get(CONTENT_TYPE).unwrap(), "text/plain");
    }

    #[tokio::test]
    async fn test_large_text_is_gzipped() {
        let cache = ResponseCache::new(Arc::new(MemoryStore::new(None)));
        let body = "abc".repeat(2000).into_bytes();
        let response = write(&cache, "k", "application/json", body.clone()).await;
        assert_eq!(response.headers().get(CONTENT_ENCODING).unwrap(), "gzip");

        let entry = cache.lookup("k").await.unwrap();
        assert_eq!(entry.header("content-encoding"), Some("gzip"));
        assert!(entry.body_bytes().unwrap().len() < body.len());
    }

    #[tokio::test]
    async fn test_oversized_body_evicted() {
        let kv = Arc::new(MemoryStore::new(None));
        let cache = ResponseCache::new(kv.clone());
        let body = vec![7u8; 4 * 1024 * 1024];
        let response = write(&cache, "big", "application/octet-stream", body).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!kv.exists("big").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_body_leaves_pending_record() {
        let cache = ResponseCache::new(Arc::new(MemoryStore::new(None)));
        write(&cache, "k", "text/plain", Vec::new()).await;
        assert!(cache.lookup("k").await.is_none());
        assert!(cache.read("k").await.is_some());
    }
}
