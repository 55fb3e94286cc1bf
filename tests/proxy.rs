//! Alias domains forwarding to an upstream.

use axum::http::StatusCode;

use vhost_engine::http::{HandlerError, RequestContext};

mod common;
use common::{body_text, closed_port, request, start_echo_backend, TestEngine};

const HOST: &str = "alias.example";

#[tokio::test]
async fn test_alias_forwards_request() {
    let backend = start_echo_backend().await;
    let engine = TestEngine::new();
    engine.write(
        "alias.example/params.conf",
        &format!(
            r#"{{"alias": {{"url": "http://{}", "headers": {{"X-Api-Key": "k1"}}}}}}"#,
            backend
        ),
    );
    engine.state.registry.app(HOST).unwrap();

    let response = engine.get(HOST, "/api/items?page=2").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-backend"], "echo");

    let head = body_text(response).await.to_ascii_lowercase();
    assert!(head.starts_with("get /api/items?page=2 http/1.1"), "{}", head);
    assert!(head.contains("x-forwarded-host: alias.example"));
    assert!(head.contains("x-real-ip: 203.0.113.7"));
    assert!(head.contains("x-api-key: k1"));
    assert!(head.contains("accept-encoding: identity"));
}

#[tokio::test]
async fn test_alias_forwards_post_body_and_static_paths() {
    let backend = start_echo_backend().await;
    let engine = TestEngine::new();
    engine.write(
        "alias.example/params.conf",
        &format!(r#"{{"alias": "http://{}/base"}}"#, backend),
    );
    engine.state.registry.app(HOST).unwrap();

    let response = engine.send(request("POST", HOST, "/submit", "hello")).await;
    let head = body_text(response).await.to_ascii_lowercase();
    assert!(head.starts_with("post /base/submit http/1.1"), "{}", head);
    assert!(head.contains("content-length: 5"));

    let response = engine.get(HOST, "/bundle.js").await;
    let head = body_text(response).await.to_ascii_lowercase();
    assert!(head.starts_with("get /base/bundle.js http/1.1"), "{}", head);
}

#[tokio::test]
async fn test_routes_win_over_alias() {
    let backend = start_echo_backend().await;
    let engine = TestEngine::new();
    engine.write(
        "alias.example/params.conf",
        &format!(r#"{{"alias": "http://{}"}}"#, backend),
    );
    engine.state.registry.app(HOST).unwrap().get("/local", |mut ctx: RequestContext| async move {
        Ok::<_, HandlerError>(ctx.text("local"))
    });

    assert_eq!(body_text(engine.get(HOST, "/local").await).await, "local");
}

#[tokio::test]
async fn test_unreachable_upstream_is_502_with_page() {
    let upstream = closed_port().await;
    let engine = TestEngine::new();
    let page = engine.root().join("bad_gateway.html");
    std::fs::write(&page, "<p>upstream down</p>").unwrap();
    engine.state.registry.apply_defaults({
        let mut defaults = (*engine.state.registry.defaults()).clone();
        defaults.bad_gateway_page = Some(page);
        defaults
    });
    engine.write(
        "alias.example/params.conf",
        &format!(r#"{{"alias": "http://{}"}}"#, upstream),
    );
    engine.state.registry.app(HOST).unwrap();

    let response = engine.get(HOST, "/anything").await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_text(response).await, "<p>upstream down</p>");
}
