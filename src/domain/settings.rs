//! Per-domain `params.conf` schema.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{CorsPolicy, ProtectionPolicy};

/// Contents of `<web_root>/<host>/params.conf`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DomainSettings {
    pub cors: Option<CorsPolicy>,
    pub protection: Option<ProtectionPolicy>,
    pub cert: Option<CertPaths>,
    /// Upstream that receives every request not answered by a route.
    pub alias: Option<Alias>,
    /// Path (without surrounding slashes) that must never be served statically.
    pub backend: Option<String>,
    #[serde(rename = "errorPages")]
    pub error_pages: BTreeMap<String, String>,
    pub dns: DnsSettings,
}

impl DomainSettings {
    /// Read and parse a settings file.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn error_page(&self, status: u16) -> Option<&str> {
        self.error_pages.get(&status.to_string()).map(String::as_str)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Certificate files, relative to the domain root.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CertPaths {
    pub key: PathBuf,
    pub crt: PathBuf,
}

/// `alias` is either a bare URL or an object with extra headers.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Alias {
    Url(String),
    Detailed {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

impl Alias {
    pub fn url(&self) -> &str {
        match self {
            Alias::Url(url) => url,
            Alias::Detailed { url, .. } => url,
        }
    }

    /// Header overrides sent upstream.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        let headers = match self {
            Alias::Url(_) => None,
            Alias::Detailed { headers, .. } => Some(headers),
        };
        headers
            .into_iter()
            .flat_map(|h| h.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DnsSettings {
    pub records: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_settings() {
        let settings: DomainSettings = serde_json::from_str(
            r#"{
                "cors": {"origin": "https://a.example", "headers": "x-token", "methods": "GET"},
                "protection": {"IPRateLimit": 10},
                "cert": {"key": "tls/key.pem", "crt": "tls/crt.pem"},
                "alias": {"url": "http://127.0.0.1:9000", "headers": {"X-Api": "1"}},
                "backend": "server",
                "errorPages": {"404": "/missing.html"},
                "dns": {"records": [{"type": "A", "value": "1.2.3.4"}]}
            }"#,
        )
        .unwrap();

        assert_eq!(settings.cors.unwrap().origin, "https://a.example");
        assert_eq!(settings.protection.unwrap().ip_limit(), 10);
        assert_eq!(settings.cert.unwrap().crt, PathBuf::from("tls/crt.pem"));
        let alias = settings.alias.unwrap();
        assert_eq!(alias.url(), "http://127.0.0.1:9000");
        assert_eq!(alias.headers().collect::<Vec<_>>(), vec![("X-Api", "1")]);
        assert_eq!(settings.backend.as_deref(), Some("server"));
        assert_eq!(settings.error_pages.get("404").unwrap(), "/missing.html");
        assert_eq!(settings.dns.records.len(), 1);
    }

    #[test]
    fn test_alias_as_string() {
        let settings: DomainSettings =
            serde_json::from_str(r#"{"alias": "http://upstream:8080"}"#).unwrap();
        let alias = settings.alias.unwrap();
        assert_eq!(alias.url(), "http://upstream:8080");
        assert_eq!(alias.headers().count(), 0);
    }

    #[test]
    fn test_empty_settings() {
        let settings: DomainSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, DomainSettings::default());
        assert_eq!(settings.error_page(404), None);
    }
}
