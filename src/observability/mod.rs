//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, access lines)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout via tracing-subscriber
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through the tower layers (x-request-id)
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
