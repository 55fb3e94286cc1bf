//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! TLS handshake
//!     → tls.rs (SNI host → domain certificate → default certificate)
//!
//! WebSocket connection
//!     → connection.rs (id allocation, open-connection gauge)
//! ```

pub mod connection;
pub mod tls;

pub use tls::{SniResolver, TlsError};
