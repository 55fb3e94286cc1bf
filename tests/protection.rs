//! Protection checks in front of the pipeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::header::CONNECTION;
use axum::http::{Request, StatusCode};

use vhost_engine::events::{Event, EventKind, SubscribeOptions};
use vhost_engine::http::{HandlerError, RequestContext};
use vhost_engine::security::rate_limit::ip_key;
use vhost_engine::security::BlockReason;

mod common;
use common::TestEngine;

const HOST: &str = "guarded.example";
const CLIENT_IP: &str = "203.0.113.7";

fn counting_route(engine: &TestEngine) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    engine.state.registry.app(HOST).unwrap().get("/page", move |mut ctx: RequestContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok::<_, HandlerError>(ctx.text("page")) }
    });
    calls
}

#[tokio::test]
async fn test_blocked_subnet_closes_connection() {
    let engine = TestEngine::with_defaults(|d| {
        d.protection.blocked_ip = vec!["203.0.113.0/24".into()];
    });
    let calls = counting_route(&engine);

    let reasons = Arc::new(Mutex::new(Vec::new()));
    let seen = reasons.clone();
    engine.state.events.subscribe(
        EventKind::RequestBlocked,
        move |event| {
            if let Event::RequestBlocked { reason, request } = event {
                seen.lock().unwrap().push((reason.clone(), request.ip.clone()));
            }
        },
        SubscribeOptions::default(),
    );

    let response = engine.get(HOST, "/page").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.headers()[CONNECTION], "close");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        *reasons.lock().unwrap(),
        vec![(BlockReason::Subnet, CLIENT_IP.to_string())]
    );
}

#[tokio::test]
async fn test_blocked_country() {
    let engine = TestEngine::new();
    engine.write(
        "guarded.example/params.conf",
        r#"{"protection": {"blockedCountry": ["XX"]}}"#,
    );
    counting_route(&engine);

    let request = Request::get("/page")
        .header("host", HOST)
        .header("x-real-ip", CLIENT_IP)
        .header("cf-ipcountry", "XX")
        .body(Body::empty())
        .unwrap();
    assert_eq!(engine.send(request).await.status(), StatusCode::FORBIDDEN);

    let request = Request::get("/page")
        .header("host", HOST)
        .header("x-real-ip", CLIENT_IP)
        .header("cf-ipcountry", "DE")
        .body(Body::empty())
        .unwrap();
    assert_eq!(engine.send(request).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_ip_rate_limit_and_reset() {
    let engine = TestEngine::new();
    engine.write(
        "guarded.example/params.conf",
        r#"{"protection": {"IPRateLimit": 3}}"#,
    );
    let calls = counting_route(&engine);

    for remaining in ["2", "1", "0"] {
        let response = engine.get(HOST, "/page").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "3");
        assert_eq!(response.headers()["x-ratelimit-remaining"], remaining);
    }

    let limited = engine.get(HOST, "/page").await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.headers().get(CONNECTION).is_none());
    assert_eq!(limited.headers()["x-ratelimit-remaining"], "0");
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // Let the window expire.
    assert!(engine.state.kv.expire(&ip_key(CLIENT_IP), 1).await.unwrap());
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let response = engine.get(HOST, "/page").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "2");
}

#[tokio::test]
async fn test_ban_hook_blocks_without_invoking_handler() {
    let engine = TestEngine::new();
    let calls = counting_route(&engine);
    engine
        .state
        .extensions
        .on_ban_request(|info| (info.url == "/page").then(|| "scanner".to_string()));

    let requests = Arc::new(AtomicUsize::new(0));
    let counter = requests.clone();
    engine.state.events.subscribe(
        EventKind::Request,
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        SubscribeOptions::default(),
    );

    let response = engine.get(HOST, "/page").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.headers()[CONNECTION], "close");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_disabled_protection_sends_no_rate_headers() {
    let engine = TestEngine::new();
    engine.write(
        "guarded.example/params.conf",
        r#"{"protection": {"enabled": false, "blockedIP": ["203.0.113.7"]}}"#,
    );
    counting_route(&engine);

    let response = engine.get(HOST, "/page").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-ratelimit-limit").is_none());
}
