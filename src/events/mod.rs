//! Typed publish/subscribe hooks.
//!
//! # Data Flow
//! ```text
//! pipeline / websocket / listeners
//!     → EventBus::emit(&Event)          (notifications, advisory)
//!     → subscribers run synchronously, in registration order
//!
//! pipeline, before dispatch
//!     → Extensions::ban_decision()      (may turn the request into an advisory block)
//!     → Extensions::post_process(ctx)   (may enrich a matched route's context)
//!     → Extensions::analytics(ip, hdrs) (single statistics callback)
//! ```
//!
//! # Design Decisions
//! - Event kinds are an enum, payloads are typed per kind
//! - Callbacks are cloned out of the lock before running, so a callback may
//!   subscribe or unsubscribe without deadlocking
//! - Once-only subscribers are removed after their first delivery

pub mod extensions;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::security::BlockReason;

pub use extensions::Extensions;

/// Event discriminant used for subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConnectionAccepted,
    Request,
    RequestBlocked,
    RouteMatched,
    RequestSkipped,
    Listening,
    KvFallback,
    DefaultsReloaded,
}

/// Identity of the request an event refers to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestInfo {
    pub domain: String,
    pub ip: String,
    pub country: Option<String>,
    pub url: String,
    pub user_agent: String,
}

/// Why a request left the pipeline without normal output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Maintenance,
    InternalError,
    MethodNotAllowed,
    NotFound,
    Forbidden,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::Maintenance => "maintenance",
            SkipReason::InternalError => "internal-error",
            SkipReason::MethodNotAllowed => "method-not-allowed",
            SkipReason::NotFound => "not-found",
            SkipReason::Forbidden => "forbidden",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    Http,
    Https,
}

/// An engine event.
#[derive(Debug, Clone)]
pub enum Event {
    /// A WebSocket connection was accepted for a domain.
    ConnectionAccepted { domain: String, ip: String, path: String },
    /// A request passed protection and entered the pipeline.
    Request(RequestInfo),
    RequestBlocked { request: RequestInfo, reason: BlockReason },
    RouteMatched { domain: String, method: String, pattern: String },
    RequestSkipped { domain: String, reason: SkipReason },
    Listening { listener: ListenerKind, address: SocketAddr },
    KvFallback { reason: String },
    DefaultsReloaded,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ConnectionAccepted { .. } => EventKind::ConnectionAccepted,
            Event::Request(_) => EventKind::Request,
            Event::RequestBlocked { .. } => EventKind::RequestBlocked,
            Event::RouteMatched { .. } => EventKind::RouteMatched,
            Event::RequestSkipped { .. } => EventKind::RequestSkipped,
            Event::Listening { .. } => EventKind::Listening,
            Event::KvFallback { .. } => EventKind::KvFallback,
            Event::DefaultsReloaded => EventKind::DefaultsReloaded,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeOptions {
    /// Remove the subscriber after its first delivery.
    pub once: bool,
}

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Clone)]
struct Subscriber {
    id: SubscriptionId,
    callback: Callback,
    once: bool,
}

/// Synchronous, in-order event dispatcher.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<EventKind, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, callback: F, options: SubscribeOptions) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(Subscriber {
                id,
                callback: Arc::new(callback),
                once: options.once,
            });
        id
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = subscribers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != id);
        before != list.len()
    }

    /// Deliver an event. Returns false when nobody is subscribed to its kind.
    pub fn emit(&self, event: &Event) -> bool {
        let kind = event.kind();
        let targets: Vec<Subscriber> = {
            let subscribers = self.subscribers.read().unwrap_or_else(PoisonError::into_inner);
            match subscribers.get(&kind) {
                Some(list) if !list.is_empty() => list.clone(),
                _ => return false,
            }
        };

        let mut fired_once = Vec::new();
        for subscriber in &targets {
            (subscriber.callback)(event);
            if subscriber.once {
                fired_once.push(subscriber.id);
            }
        }

        if !fired_once.is_empty() {
            let mut subscribers = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(list) = subscribers.get_mut(&kind) {
                list.retain(|s| !fired_once.contains(&s.id));
            }
        }
        true
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
