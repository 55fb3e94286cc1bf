//! TLS certificate selection by SNI host name.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use axum_server::tls_rustls::RustlsConfig;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;

use crate::domain::DomainRegistry;

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificate in {0}")]
    NoCertificate(PathBuf),
    #[error("no private key in {0}")]
    NoKey(PathBuf),
    #[error("unsupported private key in {path}: {source}")]
    UnsupportedKey {
        path: PathBuf,
        #[source]
        source: rustls::Error,
    },
}

/// Build a signing key from a PEM certificate chain and private key.
pub fn load_certified_key(cert_path: &Path, key_path: &Path) -> Result<CertifiedKey, TlsError> {
    let open = |path: &Path| {
        File::open(path)
            .map(BufReader::new)
            .map_err(|source| TlsError::Io {
                path: path.to_path_buf(),
                source,
            })
    };

    let certs = rustls_pemfile::certs(&mut open(cert_path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: cert_path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificate(cert_path.to_path_buf()));
    }

    let key = rustls_pemfile::private_key(&mut open(key_path)?)
        .map_err(|source| TlsError::Io {
            path: key_path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoKey(key_path.to_path_buf()))?;

    let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&key).map_err(|source| {
        TlsError::UnsupportedKey {
            path: key_path.to_path_buf(),
            source,
        }
    })?;
    Ok(CertifiedKey::new(certs, signing_key))
}

/// Picks the certificate of the domain named in the client hello.
///
/// Order: the domain's cached key, the domain's own `cert` files, then the
/// process default which is built once and kept until [`clear_default`].
///
/// [`clear_default`]: SniResolver::clear_default
pub struct SniResolver {
    registry: Arc<DomainRegistry>,
    default: ArcSwapOption<CertifiedKey>,
}

impl SniResolver {
    pub fn new(registry: Arc<DomainRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            default: ArcSwapOption::empty(),
        })
    }

    /// Drop the cached default certificate so the next handshake rereads it.
    pub fn clear_default(&self) {
        self.default.store(None);
    }

    pub fn certificate_for(&self, host: Option<&str>) -> Option<Arc<CertifiedKey>> {
        if let Some(domain) = host.and_then(|h| self.registry.lookup(&h.to_ascii_lowercase())) {
            if let Some(key) = domain.certificate() {
                return Some(key);
            }
            if let Some(paths) = &domain.settings().cert {
                let cert = domain.root().join(&paths.crt);
                let key = domain.root().join(&paths.key);
                if cert.is_file() && key.is_file() {
                    match load_certified_key(&cert, &key) {
                        Ok(built) => return Some(domain.cache_certificate(Arc::new(built))),
                        Err(e) => {
                            tracing::warn!(domain = %domain.name(), error = %e, "Domain certificate unusable");
                        }
                    }
                }
            }
        }
        self.default_certificate()
    }

    fn default_certificate(&self) -> Option<Arc<CertifiedKey>> {
        if let Some(key) = self.default.load_full() {
            return Some(key);
        }
        let defaults = self.registry.defaults();
        match load_certified_key(&defaults.tls.cert_path, &defaults.tls.key_path) {
            Ok(key) => {
                let key = Arc::new(key);
                self.default.store(Some(key.clone()));
                Some(key)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Default certificate unavailable");
                None
            }
        }
    }

    /// Server config for the HTTPS listener.
    pub fn rustls_config(self: &Arc<Self>) -> RustlsConfig {
        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_cert_resolver(self.clone());
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        RustlsConfig::from_config(Arc::new(config))
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let host = client_hello.server_name();
        let key = self.certificate_for(host);
        if key.is_none() {
            tracing::warn!(sni = host.unwrap_or("-"), "TLS handshake failed: no certificate");
        }
        key
    }
}

impl std::fmt::Debug for SniResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SniResolver")
            .field("default_cached", &self.default.load().is_some())
            .finish()
    }
}
