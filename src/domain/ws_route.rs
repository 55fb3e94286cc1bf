//! WebSocket routes registered on a domain.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::net::connection::ConnectionId;

/// A data frame exchanged with a WebSocket client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Bytes),
}

/// Instruction for a connection's writer task.
#[derive(Debug)]
pub(crate) enum Outgoing {
    Message(WsMessage),
    Close,
}

/// Handle to one open connection on a WS route.
#[derive(Clone)]
pub struct WsClient {
    id: ConnectionId,
    ip: String,
    path: String,
    sender: mpsc::UnboundedSender<Outgoing>,
}

impl WsClient {
    pub(crate) fn new(
        id: ConnectionId,
        ip: String,
        path: String,
        sender: mpsc::UnboundedSender<Outgoing>,
    ) -> Self {
        Self { id, ip, path, sender }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Queue a message. Returns false once the connection is gone.
    pub fn send(&self, message: WsMessage) -> bool {
        self.sender.send(Outgoing::Message(message)).is_ok()
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(WsMessage::Text(text.into()))
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) -> bool {
        self.send(WsMessage::Binary(data.into()))
    }

    /// Ask the server to close the connection.
    pub fn close(&self) -> bool {
        self.sender.send(Outgoing::Close).is_ok()
    }

    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

impl fmt::Debug for WsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsClient")
            .field("id", &self.id)
            .field("ip", &self.ip)
            .field("path", &self.path)
            .finish()
    }
}

type OpenCallback = Arc<dyn Fn(&WsClient) + Send + Sync>;
type MessageCallback = Arc<dyn Fn(&WsClient, WsMessage) + Send + Sync>;
type CloseCallback = Arc<dyn Fn(&WsClient) + Send + Sync>;

/// Callbacks of a WS route. Unset callbacks do nothing.
#[derive(Clone, Default)]
pub struct WsHandlers {
    on_open: Option<OpenCallback>,
    on_message: Option<MessageCallback>,
    on_close: Option<CloseCallback>,
}

impl WsHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&WsClient) + Send + Sync + 'static,
    {
        self.on_open = Some(Arc::new(f));
        self
    }

    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&WsClient, WsMessage) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(f));
        self
    }

    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&WsClient) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(f));
        self
    }
}

/// A registered WebSocket endpoint. Matched by exact path.
pub struct WsRoute {
    pub pattern: String,
    handlers: WsHandlers,
    clients: DashMap<ConnectionId, WsClient>,
}

impl WsRoute {
    pub fn new(pattern: impl Into<String>, handlers: WsHandlers) -> Self {
        Self {
            pattern: pattern.into(),
            handlers,
            clients: DashMap::new(),
        }
    }

    pub(crate) fn opened(&self, client: &WsClient) {
        self.clients.insert(client.id(), client.clone());
        if let Some(cb) = &self.handlers.on_open {
            cb(client);
        }
    }

    pub(crate) fn message(&self, client: &WsClient, message: WsMessage) {
        if let Some(cb) = &self.handlers.on_message {
            cb(client, message);
        }
    }

    pub(crate) fn closed(&self, client: &WsClient) {
        self.clients.remove(&client.id());
        if let Some(cb) = &self.handlers.on_close {
            cb(client);
        }
    }

    /// Open connections, ordered by connection id.
    pub fn clients(&self) -> Vec<WsClient> {
        let mut clients: Vec<WsClient> = self
            .clients
            .iter()
            .filter(|entry| entry.value().is_open())
            .map(|entry| entry.value().clone())
            .collect();
        clients.sort_by_key(WsClient::id);
        clients
    }
}

impl fmt::Debug for WsRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsRoute")
            .field("pattern", &self.pattern)
            .field("clients", &self.clients.len())
            .finish()
    }
}
