//! Metrics collection and exposition.
//!
//! # Metrics
//! - `vhost_requests_total` (counter): responses by domain, status
//! - `vhost_request_duration_seconds` (histogram): pipeline latency by domain
//! - `vhost_blocked_total` (counter): protection blocks by reason
//! - `vhost_cache_total` (counter): response cache lookups by result
//! - `vhost_ws_connections` (gauge): open WebSocket connections
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels are bounded: domain names come from the registry, not raw Host headers

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(domain: &str, status: u16, start: Instant) {
    metrics::counter!(
        "vhost_requests_total",
        "domain" => domain.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("vhost_request_duration_seconds", "domain" => domain.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_blocked(reason: &str) {
    metrics::counter!("vhost_blocked_total", "reason" => reason.to_string()).increment(1);
}

pub fn record_cache(result: &'static str) {
    metrics::counter!("vhost_cache_total", "result" => result).increment(1);
}

pub fn ws_connection_opened() {
    metrics::gauge!("vhost_ws_connections").increment(1.0);
}

pub fn ws_connection_closed() {
    metrics::gauge!("vhost_ws_connections").decrement(1.0);
}
