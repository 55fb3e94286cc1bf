//! HTTP forwarding for alias domains.

use axum::body::Body;
use axum::http::header::{ACCEPT_ENCODING, CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use axum::response::Response;
use bytes::Bytes;
use url::Url;

use crate::domain::Alias;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid alias url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

/// Request data forwarded upstream.
pub struct ProxyRequest<'a> {
    pub method: Method,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub headers: &'a HeaderMap,
    pub body: Option<Bytes>,
    pub ip: &'a str,
}

/// Forwards requests to alias upstreams. Cheap to clone.
#[derive(Clone)]
pub struct AliasProxy {
    client: reqwest::Client,
}

impl AliasProxy {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default proxy client");
                reqwest::Client::new()
            });
        Self { client }
    }

    /// Upstream URL: the alias path followed by the request path and query.
    pub fn target_url(alias: &str, path: &str, query: Option<&str>) -> Result<Url, ProxyError> {
        let mut url = Url::parse(alias).map_err(|source| ProxyError::InvalidUrl {
            url: alias.to_string(),
            source,
        })?;
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}{}", base, path));
        url.set_query(query.filter(|q| !q.is_empty()));
        Ok(url)
    }

    fn upstream_headers(alias: &Alias, request: &ProxyRequest<'_>) -> HeaderMap {
        let mut headers = request.headers.clone();
        let host = headers.remove(HOST);
        headers.remove(CONNECTION);
        headers.remove(CONTENT_LENGTH);

        if let Some(host) = host {
            headers.insert(HeaderName::from_static("x-forwarded-host"), host);
        }
        let ip = if request.ip.is_empty() { "unknown" } else { request.ip };
        if let Ok(ip) = HeaderValue::from_str(ip) {
            headers.insert(HeaderName::from_static("x-real-ip"), ip);
        }
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

        for (name, value) in alias.headers() {
            match (
                HeaderName::try_from(name.to_ascii_lowercase()),
                HeaderValue::try_from(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => tracing::warn!(header = %name, "Skipping invalid alias header"),
            }
        }
        headers
    }

    /// Forward one request and stream the upstream response back.
    pub async fn forward(&self, alias: &Alias, request: ProxyRequest<'_>) -> Result<Response, ProxyError> {
        let url = Self::target_url(alias.url(), request.path, request.query)?;
        let headers = Self::upstream_headers(alias, &request);

        let mut builder = self
            .client
            .request(request.method.clone(), url.clone())
            .headers(headers);
        if request.method != Method::GET && request.method != Method::HEAD {
            if let Some(body) = request.body.filter(|b| !b.is_empty()) {
                builder = builder.body(body);
            }
        }

        tracing::debug!(upstream = %url, method = %request.method, "Forwarding to alias");
        let upstream = builder.send().await?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        headers.remove(CONNECTION);
        headers.remove(TRANSFER_ENCODING);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

impl Default for AliasProxy {
    fn default() -> Self {
        Self::new()
    }
}
