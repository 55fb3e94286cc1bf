//! The per-request serving pipeline.
//!
//! # Flow
//! ```text
//! client info (ip, country, host)
//!     → protection (hard block: 403 + close / 429)
//!     → ban hooks (advisory block)
//!     → request event, analytics, access log
//!     → maintenance (403 page)
//!     → extensionless path on a known domain: CORS, OPTIONS, route dispatch
//!     → alias proxy
//!     → non-GET: 405 page
//!     → domain directory check: 404 page
//!     → response cache
//!     → backend deny: 403 page
//!     → static file
//! ```

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE, COOKIE, RANGE, USER_AGENT};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode};
use axum::response::Response;
use futures_util::FutureExt;

use crate::cache::{cache_key, cached_response, BufferedSink, CachingSink, ResponseSink};
use crate::config::ServerDefaults;
use crate::domain::registry::validate_host;
use crate::domain::Domain;
use crate::events::{Event, RequestInfo, SkipReason};
use crate::http::context::{Outcome, RequestContext, RequestParts};
use crate::http::cookies::parse_cookies;
use crate::http::error_pages;
use crate::http::proxy::ProxyRequest;
use crate::http::server::AppState;
use crate::observability::{logging, metrics};
use crate::routing::{Params, Route};
use crate::security::{BlockReason, Decision, Protection, RateStatus};
use crate::static_files::{self, Resolution, StaticReply};

/// Who sent a request and which host it targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: String,
    pub country: Option<String>,
    pub host: String,
    pub user_agent: String,
}

impl ClientInfo {
    /// Proxy headers (`cf-connecting-ip`, `x-real-ip`) win over the socket address.
    pub fn from_request(headers: &HeaderMap, uri_host: Option<&str>, peer: Option<SocketAddr>) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let ip = header("cf-connecting-ip")
            .or_else(|| header("x-real-ip"))
            .map(str::to_string)
            .or_else(|| peer.map(|p| p.ip().to_string()))
            .unwrap_or_default();

        let host = header("host")
            .or(uri_host)
            .map(strip_port)
            .unwrap_or_default()
            .to_ascii_lowercase();

        Self {
            ip,
            country: header("cf-ipcountry").map(str::to_string),
            host,
            user_agent: header(USER_AGENT.as_str()).unwrap_or_default().to_string(),
        }
    }

    pub fn request_info(&self, url: &str) -> RequestInfo {
        RequestInfo {
            domain: self.host.clone(),
            ip: self.ip.clone(),
            country: self.country.clone(),
            url: url.to_string(),
            user_agent: self.user_agent.clone(),
        }
    }
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    host.split(':').next().unwrap_or(host)
}

/// A path whose last segment has a dotted extension after a non-empty stem.
pub fn has_extension(path: &str) -> bool {
    let last = path.rsplit('/').next().unwrap_or_default();
    matches!(last.rsplit_once('.'), Some((stem, _)) if !stem.is_empty())
}

/// The response for a refused request.
pub fn blocked_response(reason: &BlockReason) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = reason.status();
    if !reason.is_rate_limit() {
        response
            .headers_mut()
            .insert(CONNECTION, HeaderValue::from_static("close"));
    }
    response
}

fn apply_rate_headers(response: &mut Response, rate: RateStatus) {
    let headers = response.headers_mut();
    headers.insert(HeaderName::from_static("x-ratelimit-limit"), HeaderValue::from(rate.limit));
    headers.insert(
        HeaderName::from_static("x-ratelimit-remaining"),
        HeaderValue::from(rate.remaining),
    );
}

fn apply_cors(response: &mut Response, domain: &Domain) {
    let cors = domain.cors();
    let headers = response.headers_mut();
    for (name, value) in [
        ("access-control-allow-origin", &cors.origin),
        ("access-control-allow-headers", &cors.headers),
        ("access-control-allow-methods", &cors.methods),
    ] {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers
                .entry(HeaderName::from_static(name))
                .or_insert(value);
        }
    }
}

fn status_only(status: StatusCode) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

/// Log a protection refusal, notify subscribers, count it.
fn report_block(state: &AppState, method: &Method, client: &ClientInfo, info: &RequestInfo, reason: &BlockReason) {
    logging::blocked(
        &client.host,
        method.as_str(),
        &info.url,
        &client.ip,
        client.country.as_deref(),
        &client.user_agent,
    );
    metrics::record_blocked(&reason.to_string());
    state.events.emit(&Event::RequestBlocked {
        request: info.clone(),
        reason: reason.clone(),
    });
}

/// Serve one HTTP request.
pub async fn handle(state: &AppState, request: Request<Body>) -> Response {
    let start = Instant::now();
    let peer = request
        .extensions()
        .get::<axum::extract::ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let (parts, body) = request.into_parts();

    let client = ClientInfo::from_request(&parts.headers, parts.uri.host(), peer);
    let path = urlencoding::decode(parts.uri.path())
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| parts.uri.path().to_string());
    let query = parts.uri.query().map(str::to_string);
    let url = match &query {
        Some(q) => format!("{}?{}", path, q),
        None => path.clone(),
    };

    let domain = state.registry.lookup(&client.host);
    let metrics_label = domain
        .as_ref()
        .map(|d| d.name().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let defaults = state.registry.defaults();
    let fallback: Arc<Protection>;
    let protection = match &domain {
        Some(domain) => domain.protection(),
        None => {
            fallback = state.registry.default_protection();
            fallback.as_ref()
        }
    };

    let info = client.request_info(&url);
    let verdict = protection
        .evaluate(
            state.kv.as_ref(),
            &client.ip,
            client.country.as_deref(),
            &client.user_agent,
        )
        .await;

    let mut response = if let Decision::Block(reason) = &verdict.decision {
        report_block(state, &parts.method, &client, &info, reason);
        blocked_response(reason)
    } else {
        let decision = if protection.policy().is_enabled() {
            match state.extensions.ban_decision(&info) {
                Some(reason) => {
                    let reason = BlockReason::Plugin(reason);
                    report_block(state, &parts.method, &client, &info, &reason);
                    Decision::Block(reason)
                }
                None => Decision::Allow,
            }
        } else {
            Decision::Allow
        };

        state.events.emit(&Event::Request(info.clone()));
        state.extensions.analytics(&client.ip, &parts.headers);
        logging::access(
            &client.host,
            parts.method.as_str(),
            &url,
            &client.ip,
            client.country.as_deref(),
            &client.user_agent,
        );

        match &decision {
            // Nothing of an advisory-blocked request reaches the client.
            Decision::Block(reason) => blocked_response(reason),
            Decision::Allow => {
                let request = Incoming {
                    parts,
                    body,
                    client: &client,
                    path: &path,
                    query: query.as_deref(),
                    url: &url,
                    domain,
                    defaults,
                };
                dispatch(state, request).await
            }
        }
    };

    if let Some(rate) = verdict.rate {
        apply_rate_headers(&mut response, rate);
    }
    metrics::record_request(&metrics_label, response.status().as_u16(), start);
    response
}

/// An admitted request on its way through dispatch.
struct Incoming<'a> {
    parts: Parts,
    body: Body,
    client: &'a ClientInfo,
    path: &'a str,
    query: Option<&'a str>,
    url: &'a str,
    domain: Option<Arc<Domain>>,
    defaults: Arc<ServerDefaults>,
}

impl Incoming<'_> {
    fn skip(&self, state: &AppState, reason: SkipReason) {
        state.events.emit(&Event::RequestSkipped {
            domain: self.client.host.clone(),
            reason,
        });
    }

    fn error_page(&self, status: StatusCode) -> Response {
        error_pages::redirect(status, self.domain.as_deref(), &self.defaults)
    }

    fn no_cache(&self) -> bool {
        self.parts
            .headers
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().eq_ignore_ascii_case("no-cache"))
            .unwrap_or(false)
    }
}

async fn dispatch(state: &AppState, mut req: Incoming<'_>) -> Response {
    if let Some(domain) = req.domain.clone() {
        if domain.in_maintenance() {
            req.skip(state, SkipReason::Maintenance);
            return error_pages::page(StatusCode::FORBIDDEN, req.defaults.maintenance_page.as_deref()).await;
        }

        if !has_extension(req.path) {
            let mut response = match routed(state, &mut req, &domain).await {
                Routed::Done(response) => response,
                Routed::Continue => after_routes(state, req).await,
            };
            apply_cors(&mut response, &domain);
            return response;
        }
    }
    after_routes(state, req).await
}

enum Routed {
    Done(Response),
    Continue,
}

async fn read_body(req: &mut Incoming<'_>) -> Result<Option<bytes::Bytes>, Response> {
    if req.parts.method == Method::GET || req.parts.method == Method::HEAD {
        return Ok(None);
    }
    let body = std::mem::replace(&mut req.body, Body::empty());
    match axum::body::to_bytes(body, req.defaults.max_body_bytes).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) => {
            tracing::warn!(url = %req.url, error = %e, "Request body rejected");
            Err(status_only(StatusCode::PAYLOAD_TOO_LARGE))
        }
    }
}

/// OPTIONS short-circuit and route dispatch for extensionless paths.
async fn routed(state: &AppState, req: &mut Incoming<'_>, domain: &Arc<Domain>) -> Routed {
    if req.parts.method == Method::OPTIONS {
        return Routed::Done(status_only(StatusCode::OK));
    }

    let Some((route, params)) = domain.routes().find(&req.parts.method, req.path) else {
        return Routed::Continue;
    };
    state.events.emit(&Event::RouteMatched {
        domain: domain.name().to_string(),
        method: req.parts.method.to_string(),
        pattern: route.pattern.clone(),
    });

    let cache_key = (route.cacheable && req.parts.method == Method::GET)
        .then(|| cache_key(domain.name(), req.path, &req.parts.method));
    if let Some(key) = &cache_key {
        if !req.no_cache() {
            if let Some(response) = state.cache.lookup(key).await.as_ref().and_then(cached_response) {
                return Routed::Done(response);
            }
        }
    }

    let body = match read_body(req).await {
        Ok(body) => body,
        Err(response) => return Routed::Done(response),
    };

    invoke(state, req, domain, &route, params, body, cache_key).await
}

// Mutable borrow: `Incoming` owns the `!Sync` body and `req` lives across the handler await.
async fn invoke(
    state: &AppState,
    req: &mut Incoming<'_>,
    domain: &Arc<Domain>,
    route: &Route,
    params: Params,
    body: Option<bytes::Bytes>,
    cache_key: Option<String>,
) -> Routed {
    let cookies = req
        .parts
        .headers
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(parse_cookies)
        .unwrap_or_default();

    let mut ctx = RequestContext::new(
        RequestParts {
            domain: domain.clone(),
            defaults: req.defaults.clone(),
            ip: req.client.ip.clone(),
            country: req.client.country.clone(),
            method: req.parts.method.clone(),
            url: req.url.to_string(),
            path: req.path.to_string(),
            query: req.query.map(str::to_string),
            headers: req.parts.headers.clone(),
            cookies,
            decision: Decision::Allow,
            body,
        },
        params,
    );
    state.extensions.post_process(&mut ctx);

    let result = AssertUnwindSafe(route.handler.call(ctx)).catch_unwind().await;
    let failure = match result {
        Ok(Ok(Outcome::Continue)) => return Routed::Continue,
        Ok(Ok(Outcome::Response(response))) => return Routed::Done(response),
        Ok(Ok(Outcome::Reply(reply))) => {
            let response = match cache_key {
                Some(key) => {
                    let mut sink = CachingSink::new(BufferedSink::new(), state.cache.clone(), key);
                    sink.write_header(reply.status, reply.headers).await;
                    sink.write_body(reply.body).await;
                    sink.into_response()
                }
                None => reply.into_response(),
            };
            return Routed::Done(response);
        }
        Ok(Err(e)) => error_chain(e.as_ref()),
        Err(panic) => panic_message(panic.as_ref()),
    };

    tracing::error!(
        domain = %domain.name(),
        pattern = %route.pattern,
        url = %req.url,
        error = %failure,
        "Route handler failed"
    );
    req.skip(state, SkipReason::InternalError);
    Routed::Done(req.error_page(StatusCode::INTERNAL_SERVER_ERROR))
}

fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}

/// Alias proxy, method check, cache and static files.
async fn after_routes(state: &AppState, mut req: Incoming<'_>) -> Response {
    if let Some(alias) = req.domain.as_ref().and_then(|d| d.settings().alias.clone()) {
        let body = match read_body(&mut req).await {
            Ok(body) => body,
            Err(response) => return response,
        };
        let forwarded = state
            .proxy
            .forward(
                &alias,
                ProxyRequest {
                    method: req.parts.method.clone(),
                    path: req.parts.uri.path(),
                    query: req.query,
                    headers: &req.parts.headers,
                    body,
                    ip: &req.client.ip,
                },
            )
            .await;
        return match forwarded {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(domain = %req.client.host, upstream = %alias.url(), error = %e, "Alias proxy failed");
                error_pages::page(StatusCode::BAD_GATEWAY, req.defaults.bad_gateway_page.as_deref()).await
            }
        };
    }

    if req.parts.method != Method::GET {
        req.skip(state, SkipReason::MethodNotAllowed);
        return req.error_page(StatusCode::METHOD_NOT_ALLOWED);
    }

    let root = match &req.domain {
        Some(domain) => Some(domain.root().to_path_buf()),
        None => validate_host(&req.client.host)
            .ok()
            .map(|_| req.defaults.web_root.join(&req.client.host)),
    };
    let Some(root) = root.filter(|r| r.is_dir()) else {
        req.skip(state, SkipReason::NotFound);
        return req.error_page(StatusCode::NOT_FOUND);
    };

    let key = cache_key(&req.client.host, req.path, &Method::GET);
    if !req.no_cache() {
        if let Some(response) = state.cache.lookup(&key).await.as_ref().and_then(cached_response) {
            return response;
        }
    }

    let backend = req.domain.as_ref().and_then(|d| d.settings().backend.clone());
    if static_files::is_backend_path(req.path, backend.as_deref()) {
        req.skip(state, SkipReason::Forbidden);
        return req.error_page(StatusCode::FORBIDDEN);
    }

    match static_files::resolve(&root, req.path).await {
        Resolution::NotFound => {
            req.skip(state, SkipReason::NotFound);
            req.error_page(StatusCode::NOT_FOUND)
        }
        Resolution::Forbidden => {
            req.skip(state, SkipReason::Forbidden);
            req.error_page(StatusCode::FORBIDDEN)
        }
        Resolution::UnsupportedType => status_only(StatusCode::UNSUPPORTED_MEDIA_TYPE),
        Resolution::File {
            path,
            content_type,
            size,
        } => {
            let range = req.parts.headers.get(RANGE).and_then(|v| v.to_str().ok());
            match static_files::serve(&path, content_type, size, range).await {
                Ok(StaticReply::Stream(response)) => response,
                Ok(StaticReply::Whole { content_type, body }) => {
                    let mut headers = HeaderMap::new();
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
                    let mut sink = CachingSink::new(BufferedSink::new(), state.cache.clone(), key);
                    sink.write_header(StatusCode::OK, headers).await;
                    sink.write_body(body).await;
                    sink.into_response()
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Failed to read static file");
                    req.skip(state, SkipReason::NotFound);
                    req.error_page(StatusCode::NOT_FOUND)
                }
            }
        }
    }
}
