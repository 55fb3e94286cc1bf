//! Startup orchestration.
//!
//! # Responsibilities
//! - Connect the KV store and build shared state
//! - Scan the web root for domains
//! - Start the defaults watcher and listeners
//!
//! # Design Decisions
//! - Fail fast: a bad listener address or unreadable web root is fatal
//! - A missing web root is created empty
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::net::TcpListener;

use crate::analytics::RequestCounters;
use crate::config::{ConfigError, ConfigWatcher, ServerDefaults};
use crate::domain::{AppHandle, DomainError, DomainRegistry};
use crate::events::{EventBus, Extensions};
use crate::http::server::{apply_reloads, AppState, HttpServer};
use crate::kv;
use crate::lifecycle::{signals, Shutdown};
use crate::net::tls::SniResolver;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),
    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
}

/// Upper bound on waiting for background tasks after the listeners stop.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A fully wired engine, ready to serve.
pub struct Engine {
    state: AppState,
    shutdown: Arc<Shutdown>,
}

impl Engine {
    /// Connect the KV store, build the registry and load every domain under the web root.
    pub async fn build(defaults: ServerDefaults) -> Result<Self, StartupError> {
        std::fs::create_dir_all(&defaults.web_root)?;
        let shutdown = Arc::new(Shutdown::new());
        let events = Arc::new(EventBus::new());
        let kv = kv::connect(&defaults.kv, &events, &shutdown).await;
        tracing::info!(backend = kv.backend(), "Key-value store ready");

        let registry = DomainRegistry::new(Arc::new(ArcSwap::from_pointee(defaults)));
        let hosts = registry.load_all()?;
        tracing::info!(count = hosts.len(), "Domains loaded");

        let extensions = Arc::new(Extensions::new());
        RequestCounters::new(kv.clone()).install(&extensions);

        Ok(Self {
            state: AppState::new(registry, kv, events, extensions),
            shutdown,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn events(&self) -> &EventBus {
        &self.state.events
    }

    pub fn extensions(&self) -> &Extensions {
        &self.state.extensions
    }

    /// Handle for registering routes on `host`.
    pub fn app(&self, host: &str) -> Result<AppHandle, DomainError> {
        self.state.registry.app(host)
    }

    pub fn shutdown(&self) -> Arc<Shutdown> {
        self.shutdown.clone()
    }

    /// Serve until a termination signal; `config_path` enables hot reload.
    pub async fn serve(self, config_path: Option<PathBuf>) -> Result<(), StartupError> {
        let defaults = self.state.registry.defaults();
        let listener = &defaults.listener;
        let http_addr = parse_addr(&listener.address, listener.port)?;
        let https_addr = listener
            .https
            .then(|| parse_addr(&listener.address, listener.https_port))
            .transpose()?;

        let tcp = TcpListener::bind(http_addr).await?;
        let server = Arc::new(HttpServer::new(self.state.clone()));
        let resolver = https_addr.map(|_| SniResolver::new(self.state.registry.clone()));

        let _watcher = match config_path.filter(|p| p.exists()) {
            Some(path) => {
                let (watcher, updates) = ConfigWatcher::new(&path);
                tokio::spawn(apply_reloads(
                    self.state.registry.clone(),
                    resolver.clone(),
                    self.state.events.clone(),
                    updates,
                ));
                match watcher.run() {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to watch defaults file; hot reload disabled");
                        None
                    }
                }
            }
            None => None,
        };

        let https = match (https_addr, resolver) {
            (Some(addr), Some(resolver)) => {
                let server = server.clone();
                let signal = self.shutdown.signal();
                Some(tokio::spawn(async move { server.run_tls(addr, resolver, signal).await }))
            }
            _ => None,
        };

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move { signals::shutdown_on_signal(&shutdown).await });

        let served = server.run(tcp, self.shutdown.signal()).await;
        // A failed HTTP listener still stops HTTPS and the snapshot task.
        self.shutdown.trigger("http listener stopped");
        served?;
        if let Some(task) = https {
            match task.await {
                Ok(result) => result?,
                Err(e) => tracing::error!(error = %e, "HTTPS server task failed"),
            }
        }

        self.shutdown.drain(DRAIN_TIMEOUT).await;
        Ok(())
    }
}

fn parse_addr(address: &str, port: u16) -> Result<SocketAddr, StartupError> {
    format!("{}:{}", address, port)
        .parse()
        .map_err(|_| StartupError::InvalidAddress(format!("{}:{}", address, port)))
}
