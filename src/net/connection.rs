//! Connection identity and lifetime tracking for upgraded connections.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Keep the open-connection gauge accurate, even when a task panics

use std::sync::atomic::{AtomicU64, Ordering};

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Guard that tracks an upgraded connection's lifetime.
/// Decrements the open-connection gauge when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    id: ConnectionId,
    domain: String,
}

impl ConnectionGuard {
    pub fn open(domain: &str) -> Self {
        let id = ConnectionId::new();
        metrics::ws_connection_opened();
        tracing::trace!(connection_id = %id, domain = %domain, "Connection opened");
        Self {
            id,
            domain: domain.to_string(),
        }
    }

    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        metrics::ws_connection_closed();
        tracing::trace!(connection_id = %self.id, domain = %self.domain, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn guard_ids_are_distinct() {
        let a = ConnectionGuard::open("example.com");
        let b = ConnectionGuard::open("example.com");
        assert_ne!(a.id(), b.id());
        assert!(a.id().to_string().starts_with("conn-"));
    }
}
