//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! defaults.toml
//!     → loader.rs (parse & deserialize, expand auto error pages)
//!     → validation.rs (semantic checks)
//!     → ServerDefaults (validated, immutable)
//!     → shared via ArcSwap to the pipeline and the domain registry
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new defaults
//!     → validation.rs validates
//!     → atomic swap of Arc<ServerDefaults>
//!     → next requests observe new defaults
//!
//! Per-domain params.conf files are read by the domain registry.
//! ```
//!
//! # Design Decisions
//! - Defaults are immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    CorsPolicy, ErrorPages, KvConfig, ListenerConfig, ObservabilityConfig, ProtectionPolicy,
    ServerDefaults, TlsDefaults,
};
pub use watcher::ConfigWatcher;
