//! Multi-tenant virtual-host web serving engine.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net::tls (SNI) ──▶ http::server ──▶ http::websocket (upgrades)
//!                                        │
//!                                        ▼
//!                                 http::pipeline
//!          ┌──────────────┬──────────────┼───────────────┬──────────────┐
//!          ▼              ▼              ▼               ▼              ▼
//!      security       domain +        http::proxy      cache      static_files
//!     (protection)    routing         (alias)       (KV-backed)   (web root)
//!          │                                             │
//!          └──────────────────────▶ kv ◀─────────────────┘
//!
//!     Cross-cutting: config (defaults + hot reload), events (bus + hooks),
//!     observability (tracing, metrics), lifecycle (startup, shutdown)
//! ```

pub mod analytics;
pub mod cache;
pub mod config;
pub mod domain;
pub mod events;
pub mod http;
pub mod kv;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;
pub mod security;
pub mod static_files;

pub use config::ServerDefaults;
pub use domain::{AppHandle, DomainRegistry};
pub use events::{Event, EventBus, EventKind, Extensions};
pub use http::{AppState, HttpServer, Outcome, RequestContext};
pub use lifecycle::startup::Engine;
pub use lifecycle::Shutdown;
