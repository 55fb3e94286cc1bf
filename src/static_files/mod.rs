//! Static file serving.
//!
//! # Data Flow
//! ```text
//! GET path (no route answered)
//!     → resolve.rs (normalize, deny-list, directory → index.html, content type)
//!     → serve.rs
//!         media        → range stream (200 / 206 / 416)
//!         > 10 MiB     → plain stream
//!         otherwise    → whole body through the (caching) sink
//! ```

pub mod mime;
pub mod resolve;
pub mod serve;

pub use resolve::{is_backend_path, resolve, Resolution};
pub use serve::{parse_range, serve, ByteRange, StaticReply};
