//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request id, tracing)
//!     → websocket.rs (upgrade requests)
//!     → pipeline.rs (protection, routes, alias proxy, cache, static files)
//!         → context.rs (handler view of the request, response writers)
//!         → proxy.rs (alias upstream forwarding)
//!         → error_pages.rs (308 to configured pages)
//!     → Send to client
//! ```

pub mod context;
pub mod cookies;
pub mod error_pages;
pub mod pipeline;
pub mod proxy;
pub mod server;
pub mod websocket;

pub use context::{HandlerError, HandlerResult, Outcome, Reply, RequestContext};
pub use cookies::{Cookie, Expiry, SameSite};
pub use server::{AppState, HttpServer};
