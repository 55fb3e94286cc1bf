//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! GET request (no `cache-control: no-cache`)
//!     → store.rs lookup(domain+path+[METHOD]) → hit: replay status/headers/body
//!
//! cacheable response
//!     → sink.rs CachingSink::write_header (pending record, EX 7200)
//!     → sink.rs CachingSink::write_body
//!         → compression.rs (gzip text > 1 KiB when smaller)
//!         → inner sink (client)
//!         → store.rs (full record, or eviction above 3 MiB)
//! ```
//!
//! # Design Decisions
//! - Read-then-write is not atomic; concurrent misses both write, last wins
//! - Store failures never fail a request

pub mod compression;
pub mod sink;
pub mod store;

pub use sink::{cached_response, BufferedSink, CachingSink, ResponseSink};
pub use store::{cache_key, CacheEntry, ResponseCache, CACHE_TTL_SECS, MAX_CACHED_BODY};
