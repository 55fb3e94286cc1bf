//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with a single fallback feeding the pipeline
//! - Wire up middleware (tracing, request ID)
//! - Serve HTTP on a TCP listener and HTTPS through the SNI resolver
//! - Apply defaults reloads to the registry and certificate cache

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Request},
    response::Response,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::cache::ResponseCache;
use crate::config::ServerDefaults;
use crate::domain::DomainRegistry;
use crate::events::{Event, EventBus, Extensions, ListenerKind};
use crate::http::proxy::AliasProxy;
use crate::http::{pipeline, websocket};
use crate::kv::KvStore;
use crate::net::tls::SniResolver;

pub const X_REQUEST_ID: &str = "x-request-id";

/// How long in-flight requests get after shutdown is triggered.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DomainRegistry>,
    pub kv: Arc<dyn KvStore>,
    pub cache: ResponseCache,
    pub events: Arc<EventBus>,
    pub extensions: Arc<Extensions>,
    pub proxy: AliasProxy,
}

impl AppState {
    pub fn new(
        registry: Arc<DomainRegistry>,
        kv: Arc<dyn KvStore>,
        events: Arc<EventBus>,
        extensions: Arc<Extensions>,
    ) -> Self {
        Self {
            registry,
            cache: ResponseCache::new(kv.clone()),
            kv,
            events,
            extensions,
            proxy: AliasProxy::new(),
        }
    }
}

/// UUID v4 request ids.
#[derive(Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// HTTP(S) front of the engine.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        let router = Self::build_router(state.clone());
        Self { router, state }
    }

    /// Build the Axum router with all middleware layers.
    pub fn build_router(state: AppState) -> Router {
        let request_id = HeaderName::from_static(X_REQUEST_ID);
        Router::new()
            .fallback(serve_request)
            .with_state(state)
            .layer(PropagateRequestIdLayer::new(request_id.clone()))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(request_id, UuidRequestId))
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve plain HTTP until `shutdown` fires.
    pub async fn run<F>(&self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");
        self.state.events.emit(&Event::Listening {
            listener: ListenerKind::Http,
            address: addr,
        });

        let app = self
            .router
            .clone()
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!(address = %addr, "HTTP server stopped");
        Ok(())
    }

    /// Serve HTTPS with per-domain certificates until `shutdown` fires.
    pub async fn run_tls<F>(&self, addr: SocketAddr, resolver: Arc<SniResolver>, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            shutdown.await;
            drain.graceful_shutdown(Some(DRAIN_TIMEOUT));
        });

        tracing::info!(address = %addr, "HTTPS server starting");
        self.state.events.emit(&Event::Listening {
            listener: ListenerKind::Https,
            address: addr,
        });

        let app = self
            .router
            .clone()
            .into_make_service_with_connect_info::<SocketAddr>();
        axum_server::bind_rustls(addr, resolver.rustls_config())
            .handle(handle)
            .serve(app)
            .await?;

        tracing::info!(address = %addr, "HTTPS server stopped");
        Ok(())
    }
}

/// Fallback handler: upgrades go to the WebSocket router, everything else to the pipeline.
async fn serve_request(State(state): State<AppState>, request: Request<Body>) -> Response {
    if websocket::is_upgrade(request.headers()) {
        return websocket::handle(&state, request).await;
    }
    pipeline::handle(&state, request).await
}

/// Apply reloaded defaults as they arrive from the config watcher.
pub async fn apply_reloads(
    registry: Arc<DomainRegistry>,
    resolver: Option<Arc<SniResolver>>,
    events: Arc<EventBus>,
    mut updates: mpsc::UnboundedReceiver<ServerDefaults>,
) {
    while let Some(defaults) = updates.recv().await {
        registry.apply_defaults(defaults);
        if let Some(resolver) = &resolver {
            resolver.clear_default();
        }
        tracing::info!("Server defaults reloaded");
        events.emit(&Event::DefaultsReloaded);
    }
}
