//! Error page redirects and fixed-page responses.

use std::path::Path;

use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, LOCATION};
use axum::http::{HeaderValue, StatusCode};
use axum::response::Response;

use crate::config::ServerDefaults;
use crate::domain::Domain;

/// 308 to the configured page for `status`, or the bare status with an empty body.
pub fn redirect(status: StatusCode, domain: Option<&Domain>, defaults: &ServerDefaults) -> Response {
    let code = status.as_u16();
    let target = match domain {
        Some(domain) => domain.error_page(code, defaults),
        None => defaults.error_page(code),
    };

    let mut response = Response::new(Body::empty());
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));

    match target.and_then(|t| HeaderValue::from_str(t).ok()) {
        Some(location) => {
            *response.status_mut() = StatusCode::PERMANENT_REDIRECT;
            response.headers_mut().insert(LOCATION, location);
        }
        None => *response.status_mut() = status,
    }
    response
}

/// `status` with an HTML page read from disk; an unreadable page yields an empty body.
pub async fn page(status: StatusCode, page: Option<&Path>) -> Response {
    let body = match page {
        Some(path) => match tokio::fs::read(path).await {
            Ok(bytes) => Body::from(bytes),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Error page unavailable");
                Body::empty()
            }
        },
        None => Body::empty(),
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainSettings;

    fn defaults_with_404() -> ServerDefaults {
        let mut defaults = ServerDefaults::default();
        defaults
            .error_pages
            .pages
            .insert("404".into(), "https://err.example/404".into());
        defaults
    }

    #[test]
    fn test_domain_page_wins() {
        let defaults = defaults_with_404();
        let mut settings = DomainSettings::default();
        settings.error_pages.insert("404".into(), "/own-404.html".into());
        let domain = Domain::new("a.example", "/tmp/a".into(), settings, &defaults);

        let response = redirect(StatusCode::NOT_FOUND, Some(&domain), &defaults);
        assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(response.headers()[LOCATION], "/own-404.html");
    }

    #[test]
    fn test_falls_back_to_defaults_then_status() {
        let defaults = defaults_with_404();
        let response = redirect(StatusCode::NOT_FOUND, None, &defaults);
        assert_eq!(response.headers()[LOCATION], "https://err.example/404");

        let response = redirect(StatusCode::METHOD_NOT_ALLOWED, None, &defaults);
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(response.headers().get(LOCATION).is_none());
    }

    #[tokio::test]
    async fn test_page_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("maintenance.html");
        std::fs::write(&path, "<p>back soon</p>").unwrap();

        let response = page(StatusCode::FORBIDDEN, Some(&path)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"<p>back soon</p>");

        let missing = page(StatusCode::BAD_GATEWAY, Some(&dir.path().join("nope"))).await;
        assert_eq!(missing.status(), StatusCode::BAD_GATEWAY);
    }
}
