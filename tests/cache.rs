//! Response cache behaviour for cacheable routes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::http::header::CACHE_CONTROL;
use axum::http::StatusCode;
use serde_json::json;

use vhost_engine::cache::{cache_key, MAX_CACHED_BODY};
use vhost_engine::http::{HandlerError, RequestContext};

mod common;
use common::{body_bytes, body_text, get, TestEngine};

const HOST: &str = "cache.example";

#[tokio::test]
async fn test_cached_get_never_reinvokes_handler() {
    let engine = TestEngine::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    engine.state.registry.app(HOST).unwrap().get_cached("/stats", move |mut ctx: RequestContext| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move { Ok::<_, HandlerError>(ctx.json(&json!({ "call": n }))) }
    });

    for _ in 0..3 {
        let response = engine.get(HOST, "/stats").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, r#"{"call":1}"#);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let mut bypass = get(HOST, "/stats");
    bypass
        .headers_mut()
        .insert(CACHE_CONTROL, "no-cache".parse().unwrap());
    let response = engine.send(bypass).await;
    assert_eq!(body_text(response).await, r#"{"call":2}"#);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_plain_routes_are_not_cached() {
    let engine = TestEngine::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    engine.state.registry.app(HOST).unwrap().get("/live", move |mut ctx: RequestContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok::<_, HandlerError>(ctx.text("live")) }
    });

    engine.get(HOST, "/live").await;
    engine.get(HOST, "/live").await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(engine
        .state
        .cache
        .read(&cache_key(HOST, "/live", &axum::http::Method::GET))
        .await
        .is_none());
}

#[tokio::test]
async fn test_oversized_body_is_evicted() {
    let engine = TestEngine::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    engine.state.registry.app(HOST).unwrap().get_cached("/big", move |mut ctx: RequestContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        // No content type: stored as-is, never compressed.
        let body = vec![7u8; 4 * 1024 * 1024];
        async move { Ok::<_, HandlerError>(ctx.raw(body)) }
    });

    let response = engine.get(HOST, "/big").await;
    assert_eq!(body_bytes(response).await.len(), 4 * 1024 * 1024);
    assert!(4 * 1024 * 1024 > MAX_CACHED_BODY);

    let key = cache_key(HOST, "/big", &axum::http::Method::GET);
    assert!(engine.state.cache.read(&key).await.is_none());

    engine.get(HOST, "/big").await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_empty_reply_is_not_cached() {
    let engine = TestEngine::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    engine.state.registry.app(HOST).unwrap().get_cached("/empty", move |mut ctx: RequestContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok::<_, HandlerError>(ctx.text("")) }
    });

    engine.get(HOST, "/empty").await;
    engine.get(HOST, "/empty").await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
