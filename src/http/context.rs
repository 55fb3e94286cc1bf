//! Per-request handler context and response writers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::ServerDefaults;
use crate::domain::Domain;
use crate::http::cookies::Cookie;
use crate::http::error_pages;
use crate::routing::Params;
use crate::security::Decision;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<Outcome, HandlerError>;

/// What a handler hands back to the pipeline.
#[derive(Debug)]
pub enum Outcome {
    /// A complete reply built by one of the writers.
    Reply(Reply),
    /// A ready response (error page redirects, custom streams).
    Response(Response),
    /// Keep going through the pipeline as if no route matched.
    Continue,
}

/// Buffered reply; cacheable routes pass it through the response cache.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Request data as captured by the pipeline.
pub(crate) struct RequestParts {
    pub domain: Arc<Domain>,
    pub defaults: Arc<ServerDefaults>,
    pub ip: String,
    pub country: Option<String>,
    pub method: Method,
    pub url: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub cookies: HashMap<String, String>,
    pub decision: Decision,
    pub body: Option<Bytes>,
}

/// Everything a route handler sees of its request.
pub struct RequestContext {
    domain: Arc<Domain>,
    defaults: Arc<ServerDefaults>,
    pub ip: String,
    pub country: Option<String>,
    pub method: Method,
    /// Path and query as received.
    pub url: String,
    pub headers: HeaderMap,
    pub cookies: HashMap<String, String>,
    pub params: Params,
    pub decision: Decision,
    /// Typed values attached by post-processing hooks.
    pub extensions: axum::http::Extensions,
    path: String,
    query: Option<String>,
    body: Option<Bytes>,
    status: StatusCode,
    response_headers: HeaderMap,
    sent: bool,
}

impl RequestContext {
    pub(crate) fn new(parts: RequestParts, params: Params) -> Self {
        Self {
            domain: parts.domain,
            defaults: parts.defaults,
            ip: parts.ip,
            country: parts.country,
            method: parts.method,
            url: parts.url,
            headers: parts.headers,
            cookies: parts.cookies,
            params,
            decision: parts.decision,
            extensions: axum::http::Extensions::new(),
            path: parts.path,
            query: parts.query,
            body: parts.body,
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            sent: false,
        }
    }

    pub fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    pub fn defaults(&self) -> &ServerDefaults {
        &self.defaults
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Query string as a map; repeated keys keep the last value.
    pub fn query(&self) -> HashMap<String, String> {
        self.query
            .as_deref()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default()
    }

    /// Raw request body. Always `None` for GET and HEAD.
    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn body_text(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Body parsed as JSON; `None` when absent or malformed.
    pub fn body_json<T: DeserializeOwned>(&self) -> Option<T> {
        self.body
            .as_ref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }

    /// Body parsed as `application/x-www-form-urlencoded`.
    pub fn body_form(&self) -> Option<HashMap<String, String>> {
        self.body
            .as_ref()
            .map(|b| url::form_urlencoded::parse(b).into_owned().collect())
    }

    /// Whether a writer already produced the reply.
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Set the status used by the next writer.
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    /// Add a response header. Returns false for invalid input or once the reply is built.
    pub fn set_header(&mut self, name: &str, value: &str) -> bool {
        if self.sent {
            return false;
        }
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.response_headers.insert(name, value);
                true
            }
            _ => false,
        }
    }

    /// Queue a `Set-Cookie` header. Refused once the reply is built.
    pub fn set_cookie(&mut self, cookie: Cookie) -> bool {
        if self.sent {
            return false;
        }
        match HeaderValue::from_str(&cookie.to_header_value()) {
            Ok(value) => {
                self.response_headers.append(SET_COOKIE, value);
                true
            }
            Err(_) => false,
        }
    }

    fn reply(&mut self, content_type: Option<&'static str>, body: Bytes) -> Outcome {
        self.sent = true;
        let mut headers = std::mem::take(&mut self.response_headers);
        if let Some(ct) = content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(ct));
        }
        Outcome::Reply(Reply {
            status: self.status,
            headers,
            body,
        })
    }

    pub fn json<T: Serialize>(&mut self, value: &T) -> Outcome {
        match serde_json::to_vec(value) {
            Ok(body) => self.reply(Some("application/json"), Bytes::from(body)),
            Err(e) => {
                tracing::error!(url = %self.url, error = %e, "Failed to encode JSON reply");
                self.status = StatusCode::INTERNAL_SERVER_ERROR;
                self.empty()
            }
        }
    }

    pub fn html(&mut self, body: impl Into<Bytes>) -> Outcome {
        self.reply(Some("text/html; charset=utf-8"), body.into())
    }

    pub fn text(&mut self, body: impl Into<Bytes>) -> Outcome {
        self.reply(Some("text/plain; charset=utf-8"), body.into())
    }

    /// Body without a content type.
    pub fn raw(&mut self, body: impl Into<Bytes>) -> Outcome {
        self.reply(None, body.into())
    }

    /// No body: redirect to the error page configured for the pending status,
    /// or send the bare status.
    pub fn empty(&mut self) -> Outcome {
        self.sent = true;
        Outcome::Response(error_pages::redirect(
            self.status,
            Some(self.domain.as_ref()),
            &self.defaults,
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::DomainSettings;
    use axum::http::header::LOCATION;

    pub(crate) fn context(method: Method, url: &str, body: Option<&str>) -> RequestContext {
        let defaults = Arc::new(ServerDefaults::default());
        let domain = Arc::new(Domain::new(
            "t.example",
            "/tmp/t.example".into(),
            DomainSettings::default(),
            &defaults,
        ));
        let (path, query) = match url.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (url.to_string(), None),
        };
        RequestContext::new(
            RequestParts {
                domain,
                defaults,
                ip: "127.0.0.1".into(),
                country: None,
                method,
                url: url.into(),
                path,
                query,
                headers: HeaderMap::new(),
                cookies: HashMap::new(),
                decision: Decision::Allow,
                body: body.map(|b| Bytes::from(b.to_string())),
            },
            Params::new(),
        )
    }

    #[test]
    fn test_writers_set_content_type_and_status() {
        let mut ctx = context(Method::GET, "/", None);
        ctx.status(StatusCode::CREATED);
        let Outcome::Reply(reply) = ctx.json(&serde_json::json!({"ok": true})) else {
            panic!("expected reply");
        };
        assert_eq!(reply.status, StatusCode::CREATED);
        assert_eq!(reply.headers[CONTENT_TYPE], "application/json");
        assert_eq!(&reply.body[..], br#"{"ok":true}"#);

        let mut ctx = context(Method::GET, "/", None);
        let Outcome::Reply(reply) = ctx.raw("bytes") else {
            panic!("expected reply");
        };
        assert!(reply.headers.get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn test_cookie_refused_after_send() {
        let mut ctx = context(Method::GET, "/", None);
        assert!(ctx.set_cookie(Cookie::new("a", "1")));
        assert!(ctx.set_header("x-one", "1"));
        let Outcome::Reply(reply) = ctx.text("hi") else {
            panic!("expected reply");
        };
        assert_eq!(reply.headers[SET_COOKIE], "a=1; Path=/; Secure; SameSite=Lax");
        assert_eq!(reply.headers["x-one"], "1");
        assert!(ctx.is_sent());
        assert!(!ctx.set_cookie(Cookie::new("b", "2")));
        assert!(!ctx.set_header("x-two", "2"));
    }

    #[test]
    fn test_empty_without_page_is_bare_status() {
        let mut ctx = context(Method::GET, "/", None);
        ctx.status(StatusCode::NOT_FOUND);
        let Outcome::Response(response) = ctx.empty() else {
            panic!("expected response");
        };
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(LOCATION).is_none());
    }

    #[test]
    fn test_body_helpers() {
        let ctx = context(Method::POST, "/submit?x=1&y=two", Some(r#"{"n": 5}"#));
        assert_eq!(ctx.query()["y"], "two");
        assert_eq!(ctx.body_json::<serde_json::Value>().unwrap()["n"], 5);
        assert_eq!(ctx.body_text().unwrap(), r#"{"n": 5}"#);

        let form = context(Method::POST, "/f", Some("a=1&b=hello+world"));
        assert_eq!(form.body_form().unwrap()["b"], "hello world");

        let get = context(Method::GET, "/", None);
        assert!(get.body_bytes().is_none());
        assert!(get.body_json::<serde_json::Value>().is_none());
    }
}
