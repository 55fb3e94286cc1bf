//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (ip, country, user-agent):
//!     → access_control.rs (IPv6 switch, blocked IPs, subnets, countries)
//!     → rate_limit.rs (per-IP and per-User-Agent fixed windows in the KV store)
//!     → protection.rs (Verdict: Allow + rate headers, or Block(reason))
//!     → Pass to the pipeline
//! ```
//!
//! # Design Decisions
//! - Checks short-circuit in a fixed order
//! - Address rules are parsed once per domain, not per request
//! - A disabled policy neither blocks nor counts

pub mod access_control;
pub mod protection;
pub mod rate_limit;

pub use protection::{BlockReason, Decision, Protection, Verdict};
pub use rate_limit::RateStatus;
