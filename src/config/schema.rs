//! Configuration schema definitions.
//!
//! Process-wide defaults live in `defaults.toml`. The CORS and protection
//! policy types are shared with the per-domain `params.conf` files, so their
//! field names follow the wire names used there.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default per-IP request budget for one rate window.
pub const DEFAULT_IP_RATE_LIMIT: u64 = 240;
/// Default per-User-Agent request budget for one rate window.
pub const DEFAULT_UA_RATE_LIMIT: u64 = 320;

/// Root process configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerDefaults {
    /// Listener configuration (bind address, ports, HTTPS switch).
    pub listener: ListenerConfig,

    /// Directory holding one sub-directory per domain.
    pub web_root: PathBuf,

    /// Fallback certificate used when a domain has none.
    pub tls: TlsDefaults,

    /// CORS policy for domains that do not define their own.
    pub cors: CorsPolicy,

    /// Protection policy for domains that do not define their own.
    pub protection: ProtectionPolicy,

    /// Status code → redirect target, used when a domain has no page of its own.
    pub error_pages: ErrorPages,

    /// Page served with 403 while a domain is in maintenance.
    pub maintenance_page: Option<PathBuf>,

    /// Page served with 502 when an alias upstream fails.
    pub bad_gateway_page: Option<PathBuf>,

    /// Upper bound for request bodies read by handlers.
    pub max_body_bytes: usize,

    pub kv: KvConfig,

    pub observability: ObservabilityConfig,
}

impl Default for ServerDefaults {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            web_root: PathBuf::from("./web"),
            tls: TlsDefaults::default(),
            cors: CorsPolicy::default(),
            protection: ProtectionPolicy::default(),
            error_pages: ErrorPages::default(),
            maintenance_page: None,
            bad_gateway_page: None,
            max_body_bytes: 2 * 1024 * 1024, // 2MB
            kv: KvConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ServerDefaults {
    /// Redirect target for a status code, if one is configured.
    pub fn error_page(&self, status: u16) -> Option<&str> {
        self.error_pages.pages.get(&status.to_string()).map(String::as_str)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0").
    pub address: String,

    /// Plain HTTP port.
    pub port: u16,

    /// Also serve HTTPS with SNI certificate selection.
    pub https: bool,

    pub https_port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 3003,
            https: false,
            https_port: 3004,
        }
    }
}

/// Process-wide fallback certificate (PEM files).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TlsDefaults {
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
}

impl Default for TlsDefaults {
    fn default() -> Self {
        Self {
            key_path: PathBuf::from("./cert/server.key"),
            cert_path: PathBuf::from("./cert/server.crt"),
        }
    }
}

/// CORS response headers for extensionless paths.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CorsPolicy {
    pub origin: String,
    pub headers: String,
    pub methods: String,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self {
            origin: "*".to_string(),
            headers: "*".to_string(),
            methods: "*".to_string(),
        }
    }
}

/// Abuse protection rules.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ProtectionPolicy {
    /// Unset means enabled.
    pub enabled: Option<bool>,

    #[serde(rename = "IPRateLimit")]
    pub ip_rate_limit: Option<u64>,

    #[serde(rename = "UserAgentRateLimit")]
    pub user_agent_rate_limit: Option<u64>,

    /// Literal addresses or CIDR subnets.
    #[serde(rename = "blockedIP")]
    pub blocked_ip: Vec<String>,

    /// Addresses exempt from country rules.
    #[serde(rename = "allowedIP")]
    pub allowed_ip: Vec<String>,

    #[serde(rename = "blockedCountry")]
    pub blocked_country: Vec<String>,

    /// When set, only these countries are admitted.
    #[serde(rename = "allowedCountry")]
    pub allowed_country: Option<Vec<String>>,

    #[serde(rename = "disAllowIPv6")]
    pub disallow_ipv6: bool,
}

impl ProtectionPolicy {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn ip_limit(&self) -> u64 {
        match self.ip_rate_limit {
            Some(limit) if limit > 0 => limit,
            _ => DEFAULT_IP_RATE_LIMIT,
        }
    }

    pub fn user_agent_limit(&self) -> u64 {
        match self.user_agent_rate_limit {
            Some(limit) if limit > 0 => limit,
            _ => DEFAULT_UA_RATE_LIMIT,
        }
    }
}

/// Error page redirect targets.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ErrorPages {
    /// Directory whose numeric file names become pages (e.g. `404`).
    pub auto: Option<PathBuf>,

    /// Status code (as string) → redirect target.
    #[serde(flatten)]
    pub pages: BTreeMap<String, String>,
}

/// Key-value store selection.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct KvConfig {
    /// Redis URL; empty or absent selects the in-process store directly.
    pub url: Option<String>,

    pub connect_timeout_secs: u64,

    /// Snapshot file of the in-process store.
    pub snapshot_path: Option<PathBuf>,

    pub snapshot_interval_secs: u64,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            url: Some("redis://localhost:6379".to_string()),
            connect_timeout_secs: 3,
            snapshot_path: Some(PathBuf::from("./kv_snapshot.json")),
            snapshot_interval_secs: 60,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
