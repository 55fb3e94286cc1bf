//! Virtual-host domains.
//!
//! # Data Flow
//! ```text
//! app(host)
//!     → registry.rs (DomainRegistry: lookup or lazy init)
//!     → settings.rs (read <web_root>/<host>/params.conf once)
//!     → Domain (routes, ws routes, policy, certificate slot)
//!     → AppHandle (registration API handed to site code)
//!
//! request / handshake
//!     → registry.lookup(host) → Arc<Domain> snapshot
//! ```
//!
//! # Design Decisions
//! - Settings are read-only after load; only routes and maintenance change
//! - In-flight requests keep their `Arc<Domain>`, so `destroy` never faults them
//! - The TLS certificate is built lazily and cached for the domain's lifetime

pub mod registry;
pub mod settings;
pub mod ws_route;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use arc_swap::ArcSwap;
use rustls::sign::CertifiedKey;

use crate::config::{CorsPolicy, ServerDefaults};
use crate::routing::RouteTable;
use crate::security::Protection;

pub use registry::{AppHandle, DomainError, DomainRegistry, WsRouteHandle};
pub use settings::{Alias, CertPaths, DomainSettings};
pub use ws_route::{WsClient, WsHandlers, WsMessage, WsRoute};

type DnsCallback = Arc<dyn Fn(&serde_json::Value) -> Option<serde_json::Value> + Send + Sync>;

/// DNS records and the optional request callback of a domain.
#[derive(Default)]
pub struct DnsHooks {
    records: Vec<serde_json::Value>,
    callback: RwLock<Option<DnsCallback>>,
}

impl DnsHooks {
    pub fn records(&self) -> &[serde_json::Value] {
        &self.records
    }

    /// Hand a DNS question to the registered callback, if any.
    pub fn resolve(&self, question: &serde_json::Value) -> Option<serde_json::Value> {
        let callback = self
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        callback.and_then(|cb| cb(question))
    }

    pub fn has_callback(&self) -> bool {
        self.callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// One virtual host.
pub struct Domain {
    name: String,
    root: PathBuf,
    settings: DomainSettings,
    cors: CorsPolicy,
    protection: Protection,
    maintenance: AtomicBool,
    routes: RouteTable,
    ws_routes: ArcSwap<Vec<Arc<WsRoute>>>,
    dns: DnsHooks,
    certificate: OnceLock<Arc<CertifiedKey>>,
}

impl Domain {
    /// Build a domain, taking CORS and protection from the defaults when
    /// the settings leave them out.
    pub fn new(name: &str, root: PathBuf, settings: DomainSettings, defaults: &ServerDefaults) -> Self {
        let cors = settings.cors.clone().unwrap_or_else(|| defaults.cors.clone());
        let protection = Protection::new(
            settings
                .protection
                .clone()
                .unwrap_or_else(|| defaults.protection.clone()),
        );
        let dns = DnsHooks {
            records: settings.dns.records.clone(),
            callback: RwLock::new(None),
        };

        Self {
            name: name.to_string(),
            root,
            settings,
            cors,
            protection,
            maintenance: AtomicBool::new(false),
            routes: RouteTable::new(),
            ws_routes: ArcSwap::from_pointee(Vec::new()),
            dns,
            certificate: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding the domain's files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &DomainSettings {
        &self.settings
    }

    pub fn cors(&self) -> &CorsPolicy {
        &self.cors
    }

    pub fn protection(&self) -> &Protection {
        &self.protection
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn dns(&self) -> &DnsHooks {
        &self.dns
    }

    pub fn in_maintenance(&self) -> bool {
        self.maintenance.load(Ordering::Relaxed)
    }

    pub fn set_maintenance(&self, on: bool) {
        self.maintenance.store(on, Ordering::Relaxed);
    }

    pub fn ws_routes(&self) -> Arc<Vec<Arc<WsRoute>>> {
        self.ws_routes.load_full()
    }

    /// First WS route whose pattern equals the path.
    pub fn find_ws_route(&self, path: &str) -> Option<Arc<WsRoute>> {
        self.ws_routes.load().iter().find(|r| r.pattern == path).cloned()
    }

    fn push_ws_route(&self, route: Arc<WsRoute>) {
        self.ws_routes.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(route.clone());
            next
        });
    }

    fn set_dns_callback(&self, callback: DnsCallback) {
        *self
            .dns
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    /// Cached certificate, if one was built already.
    pub fn certificate(&self) -> Option<Arc<CertifiedKey>> {
        self.certificate.get().cloned()
    }

    /// Cache a certificate. The first stored key wins and is returned.
    pub fn cache_certificate(&self, key: Arc<CertifiedKey>) -> Arc<CertifiedKey> {
        self.certificate.get_or_init(|| key).clone()
    }

    /// Per-domain error page, falling back to the process defaults.
    pub fn error_page<'a>(&'a self, status: u16, defaults: &'a ServerDefaults) -> Option<&'a str> {
        self.settings
            .error_page(status)
            .or_else(|| defaults.error_page(status))
    }
}

impl std::fmt::Debug for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Domain")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("maintenance", &self.in_maintenance())
            .field("routes", &self.routes.len())
            .field("ws_routes", &self.ws_routes.load().len())
            .finish()
    }
}
