//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Defaults → KV connect → Domain scan → Watcher → Listeners
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → KV snapshot → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{Engine, StartupError};
