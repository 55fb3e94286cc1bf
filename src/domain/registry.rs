//! Process-wide domain registry and the per-domain application handle.

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::http::Method;
use dashmap::DashMap;

use crate::config::ServerDefaults;
use crate::domain::settings::{DomainSettings, SettingsError};
use crate::domain::ws_route::{WsClient, WsHandlers, WsRoute};
use crate::domain::Domain;
use crate::routing::{Handler, Route};
use crate::security::Protection;

/// Name of the per-domain settings file.
pub const SETTINGS_FILE: &str = "params.conf";

#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("invalid host name '{0}'")]
    InvalidHost(String),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("failed to scan web root {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// All known domains plus the process defaults they fall back to.
pub struct DomainRegistry {
    defaults: Arc<ArcSwap<ServerDefaults>>,
    default_protection: ArcSwap<Protection>,
    domains: DashMap<String, Arc<Domain>>,
}

impl DomainRegistry {
    pub fn new(defaults: Arc<ArcSwap<ServerDefaults>>) -> Arc<Self> {
        let protection = Protection::new(defaults.load().protection.clone());
        Arc::new(Self {
            defaults,
            default_protection: ArcSwap::from_pointee(protection),
            domains: DashMap::new(),
        })
    }

    /// Current process defaults.
    pub fn defaults(&self) -> Arc<ServerDefaults> {
        self.defaults.load_full()
    }

    /// Shared defaults cell, for components that watch it directly.
    pub fn defaults_handle(&self) -> Arc<ArcSwap<ServerDefaults>> {
        self.defaults.clone()
    }

    /// Swap in reloaded defaults. Existing domains keep the policies they were built with.
    pub fn apply_defaults(&self, defaults: ServerDefaults) {
        self.default_protection
            .store(Arc::new(Protection::new(defaults.protection.clone())));
        self.defaults.store(Arc::new(defaults));
    }

    /// Protection applied to hosts without a domain record.
    pub fn default_protection(&self) -> Arc<Protection> {
        self.default_protection.load_full()
    }

    /// Get the application handle of a host, initialising the domain on first use.
    pub fn app(self: &Arc<Self>, host: &str) -> Result<AppHandle, DomainError> {
        if let Some(domain) = self.lookup(host) {
            return Ok(AppHandle::new(self.clone(), domain));
        }
        validate_host(host)?;

        let defaults = self.defaults();
        let root = defaults.web_root.join(host);
        let settings_path = root.join(SETTINGS_FILE);
        let settings = if settings_path.is_file() {
            DomainSettings::load(&settings_path)?
        } else {
            tracing::debug!(host = %host, "No params.conf, using default settings");
            DomainSettings::default()
        };

        let domain = Arc::new(Domain::new(host, root, settings, &defaults));
        self.domains.insert(host.to_string(), domain.clone());
        tracing::info!(host = %host, "Domain initialised");

        Ok(AppHandle::new(self.clone(), domain))
    }

    /// Find a domain without creating it.
    pub fn lookup(&self, host: &str) -> Option<Arc<Domain>> {
        self.domains.get(host).map(|d| d.value().clone())
    }

    /// Remove a domain. In-flight requests keep their snapshot.
    pub fn destroy(&self, host: &str) -> bool {
        let removed = self.domains.remove(host).is_some();
        if removed {
            tracing::info!(host = %host, "Domain destroyed");
        }
        removed
    }

    /// Remove the first route of `host` with this pattern; `method` defaults to GET.
    pub fn disable(&self, host: &str, pattern: &str, method: Option<&Method>) -> bool {
        match self.lookup(host) {
            Some(domain) => domain.routes().disable(pattern, method.unwrap_or(&Method::GET)),
            None => false,
        }
    }

    /// Hosts currently registered, sorted.
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.domains.iter().map(|e| e.key().clone()).collect();
        hosts.sort();
        hosts
    }

    /// Initialise every directory under the web root that carries a settings file.
    ///
    /// A domain with unreadable settings is logged and skipped.
    pub fn load_all(self: &Arc<Self>) -> Result<Vec<String>, DomainError> {
        let web_root = self.defaults().web_root.clone();
        let entries = std::fs::read_dir(&web_root).map_err(|source| DomainError::Scan {
            path: web_root.clone(),
            source,
        })?;

        let mut loaded = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.join(SETTINGS_FILE).is_file() {
                continue;
            }
            let host = entry.file_name().to_string_lossy().into_owned();
            match self.app(&host) {
                Ok(_) => loaded.push(host),
                Err(e) => tracing::error!(host = %host, error = %e, "Failed to load domain"),
            }
        }
        loaded.sort();
        Ok(loaded)
    }
}

/// Rejects host names that are not a single directory name under the web root.
pub fn validate_host(host: &str) -> Result<(), DomainError> {
    let invalid = host.is_empty()
        || host.starts_with('.')
        || host.contains(['/', '\\'])
        || host.contains("..");
    if invalid {
        Err(DomainError::InvalidHost(host.to_string()))
    } else {
        Ok(())
    }
}

/// Registration API for one domain.
#[derive(Clone)]
pub struct AppHandle {
    registry: Arc<DomainRegistry>,
    domain: Arc<Domain>,
}

impl AppHandle {
    fn new(registry: Arc<DomainRegistry>, domain: Arc<Domain>) -> Self {
        Self { registry, domain }
    }

    pub fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    /// Directory holding the domain's files.
    pub fn root(&self) -> PathBuf {
        self.domain.root().to_path_buf()
    }

    /// Register a handler for a method and pattern.
    pub fn route(&self, method: Method, pattern: &str, handler: impl Handler) -> &Self {
        self.domain.routes().push(Route::new(method, pattern, handler));
        self
    }

    pub fn get(&self, pattern: &str, handler: impl Handler) -> &Self {
        self.route(Method::GET, pattern, handler)
    }

    /// Register a GET handler whose output may be served from the response cache.
    pub fn get_cached(&self, pattern: &str, handler: impl Handler) -> &Self {
        self.domain
            .routes()
            .push(Route::new(Method::GET, pattern, handler).cacheable());
        self
    }

    pub fn post(&self, pattern: &str, handler: impl Handler) -> &Self {
        self.route(Method::POST, pattern, handler)
    }

    pub fn head(&self, pattern: &str, handler: impl Handler) -> &Self {
        self.route(Method::HEAD, pattern, handler)
    }

    pub fn delete(&self, pattern: &str, handler: impl Handler) -> &Self {
        self.route(Method::DELETE, pattern, handler)
    }

    pub fn put(&self, pattern: &str, handler: impl Handler) -> &Self {
        self.route(Method::PUT, pattern, handler)
    }

    pub fn options(&self, pattern: &str, handler: impl Handler) -> &Self {
        self.route(Method::OPTIONS, pattern, handler)
    }

    pub fn patch(&self, pattern: &str, handler: impl Handler) -> &Self {
        self.route(Method::PATCH, pattern, handler)
    }

    /// Remove the first route with this pattern; `method` defaults to GET.
    pub fn disable(&self, pattern: &str, method: Option<Method>) -> bool {
        self.domain
            .routes()
            .disable(pattern, &method.unwrap_or(Method::GET))
    }

    /// Remove the domain from the registry.
    pub fn destroy(&self) -> bool {
        self.registry.destroy(self.domain.name())
    }

    /// Register a WebSocket endpoint matched by exact path.
    pub fn ws_route(&self, pattern: &str, handlers: WsHandlers) -> WsRouteHandle {
        let route = Arc::new(WsRoute::new(pattern, handlers));
        self.domain.push_ws_route(route.clone());
        WsRouteHandle { route }
    }

    /// Register the DNS request callback, replacing any previous one.
    pub fn on_dns_request<F>(&self, callback: F)
    where
        F: Fn(&serde_json::Value) -> Option<serde_json::Value> + Send + Sync + 'static,
    {
        self.domain.set_dns_callback(Arc::new(callback));
    }

    pub fn set_maintenance(&self, on: bool) {
        self.domain.set_maintenance(on);
    }

    pub fn maintenance(&self) -> bool {
        self.domain.in_maintenance()
    }
}

/// Handle to a registered WS route.
#[derive(Clone, Debug)]
pub struct WsRouteHandle {
    route: Arc<WsRoute>,
}

impl WsRouteHandle {
    /// Open connections on this route.
    pub fn clients(&self) -> Vec<WsClient> {
        self.route.clients()
    }

    pub fn pattern(&self) -> &str {
        &self.route.pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::context::{HandlerResult, Outcome, RequestContext};

    async fn noop(_ctx: RequestContext) -> HandlerResult {
        Ok(Outcome::Continue)
    }

    fn registry_at(web_root: &std::path::Path) -> Arc<DomainRegistry> {
        let defaults = ServerDefaults {
            web_root: web_root.to_path_buf(),
            ..Default::default()
        };
        DomainRegistry::new(Arc::new(ArcSwap::from_pointee(defaults)))
    }

    #[test]
    fn test_app_reads_settings_once() {
        let dir = tempfile::tempdir().unwrap();
        let site = dir.path().join("a.example");
        std::fs::create_dir(&site).unwrap();
        std::fs::write(
            site.join(SETTINGS_FILE),
            r#"{"cors": {"origin": "https://x", "headers": "*", "methods": "GET"}}"#,
        )
        .unwrap();

        let registry = registry_at(dir.path());
        assert!(registry.lookup("a.example").is_none());

        let app = registry.app("a.example").unwrap();
        assert_eq!(app.domain().cors().origin, "https://x");
        assert_eq!(app.root(), site);

        // Later edits are not observed by the existing record.
        std::fs::write(site.join(SETTINGS_FILE), "{}").unwrap();
        let again = registry.app("a.example").unwrap();
        assert!(Arc::ptr_eq(app.domain(), again.domain()));
        assert_eq!(again.domain().cors().origin, "https://x");
    }

    #[test]
    fn test_defaults_fill_missing_policies() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_at(dir.path());
        let app = registry.app("b.example").unwrap();
        assert_eq!(app.domain().cors().origin, "*");
        assert!(app.domain().protection().policy().is_enabled());
    }

    #[test]
    fn test_invalid_settings_and_host() {
        let dir = tempfile::tempdir().unwrap();
        let site = dir.path().join("bad.example");
        std::fs::create_dir(&site).unwrap();
        std::fs::write(site.join(SETTINGS_FILE), "{not json").unwrap();

        let registry = registry_at(dir.path());
        assert!(matches!(registry.app("bad.example"), Err(DomainError::Settings(_))));
        assert!(matches!(registry.app("../etc"), Err(DomainError::InvalidHost(_))));
        assert!(registry.hosts().is_empty());
    }

    #[test]
    fn test_disable_and_destroy() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_at(dir.path());
        let app = registry.app("c.example").unwrap();
        app.get("/a", noop).post("/a", noop);

        assert!(!registry.disable("c.example", "/a", Some(&Method::PUT)));
        assert!(registry.disable("c.example", "/a", None));
        assert!(app.disable("/a", Some(Method::POST)));
        assert!(!app.disable("/a", None));

        let snapshot = registry.lookup("c.example").unwrap();
        assert!(app.destroy());
        assert!(registry.lookup("c.example").is_none());
        assert_eq!(snapshot.name(), "c.example");
        assert!(!registry.disable("c.example", "/a", None));
    }

    #[test]
    fn test_load_all_scans_settings_files() {
        let dir = tempfile::tempdir().unwrap();
        for host in ["one.example", "two.example"] {
            let site = dir.path().join(host);
            std::fs::create_dir(&site).unwrap();
            std::fs::write(site.join(SETTINGS_FILE), "{}").unwrap();
        }
        std::fs::create_dir(dir.path().join("no-settings")).unwrap();

        let registry = registry_at(dir.path());
        let loaded = registry.load_all().unwrap();
        assert_eq!(loaded, vec!["one.example", "two.example"]);
        assert_eq!(registry.hosts(), loaded);
    }

    #[test]
    fn test_maintenance_and_dns() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_at(dir.path());
        let app = registry.app("d.example").unwrap();

        assert!(!app.maintenance());
        app.set_maintenance(true);
        assert!(registry.lookup("d.example").unwrap().in_maintenance());

        assert!(!app.domain().dns().has_callback());
        app.on_dns_request(|q| Some(serde_json::json!({ "answer": q["name"] })));
        let answer = app
            .domain()
            .dns()
            .resolve(&serde_json::json!({ "name": "d.example" }))
            .unwrap();
        assert_eq!(answer["answer"], "d.example");
    }

    #[test]
    fn test_ws_route_handle() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_at(dir.path());
        let app = registry.app("e.example").unwrap();
        let handle = app.ws_route("/live", WsHandlers::new());
        assert_eq!(handle.pattern(), "/live");
        assert!(handle.clients().is_empty());
        assert!(app.domain().find_ws_route("/live").is_some());
        assert!(app.domain().find_ws_route("/live/x").is_none());
    }
}
