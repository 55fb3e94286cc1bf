//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → router.rs (ordered route table of the domain)
//!     → matcher.rs (segment-wise pattern match, params extraction)
//!     → Return: matched Route + Params, or no match
//! ```
//!
//! # Design Decisions
//! - Routes are registered at runtime by domain backends
//! - No regex in hot path (segment comparison only)
//! - Deterministic: same input always matches same route
//! - First match wins (registration order)

pub mod matcher;
pub mod router;

pub use matcher::{match_path, ParamValue, Params};
pub use router::{Handler, Route, RouteTable};
