//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use bytes::Bytes;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tower::ServiceExt;

use vhost_engine::config::ServerDefaults;
use vhost_engine::domain::DomainRegistry;
use vhost_engine::events::{EventBus, Extensions};
use vhost_engine::http::{AppState, HttpServer};
use vhost_engine::kv::MemoryStore;

/// A web root on disk plus the engine state serving it.
pub struct TestEngine {
    pub dir: TempDir,
    pub state: AppState,
    pub router: Router,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_defaults(|_| {})
    }

    /// Build with adjusted defaults; the web root always points at the temp dir.
    pub fn with_defaults(adjust: impl FnOnce(&mut ServerDefaults)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut defaults = ServerDefaults::default();
        defaults.web_root = dir.path().to_path_buf();
        adjust(&mut defaults);

        let registry = DomainRegistry::new(Arc::new(ArcSwap::from_pointee(defaults)));
        let state = AppState::new(
            registry,
            Arc::new(MemoryStore::new(None)),
            Arc::new(EventBus::new()),
            Arc::new(Extensions::new()),
        );
        let router = HttpServer::build_router(state.clone());
        Self { dir, state, router }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file below the web root, creating parent directories.
    pub fn write(&self, relative: &str, contents: impl AsRef<[u8]>) {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, host: &str, path: &str) -> Response<Body> {
        self.send(get(host, path)).await
    }
}

pub fn get(host: &str, path: &str) -> Request<Body> {
    Request::get(path)
        .header("host", host)
        .header("x-real-ip", "203.0.113.7")
        .header("user-agent", "integration-test")
        .body(Body::empty())
        .unwrap()
}

pub fn request(method: &str, host: &str, path: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .header("host", host)
        .header("x-real-ip", "203.0.113.7")
        .header("user-agent", "integration-test")
        .body(body.into())
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).unwrap()
}

/// Start a mock backend on an ephemeral port.
///
/// Every response is `200 OK` whose body is the raw request head received,
/// so tests can inspect what was forwarded.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut received = Vec::new();
                        let mut buf = [0u8; 1024];
                        while !received.windows(4).any(|w| w == b"\r\n\r\n") {
                            match socket.read(&mut buf).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) => received.extend_from_slice(&buf[..n]),
                            }
                        }
                        let head = String::from_utf8_lossy(&received).to_string();
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nX-Backend: echo\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            head.len(),
                            head
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Serve the engine router on an ephemeral port (for WebSocket tests).
pub async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let app = router.into_make_service_with_connect_info::<SocketAddr>();
        let _ = axum::serve(listener, app).await;
    });
    addr
}
