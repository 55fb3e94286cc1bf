//! WebSocket upgrades: per-domain WS routes and alias relaying.
//!
//! # Flow
//! ```text
//! upgrade request
//!     → protection (same checks as HTTP)
//!     → unknown domain / no WS routes: drop the socket
//!     → alias domain: relay frames to ws://<alias host><path>
//!     → exact-path WS route: on_open, on_message*, on_close
//!     → otherwise: close 1008 "Route not found"
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::{HeaderMap, Request};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use url::Url;

use crate::domain::{Alias, WsClient, WsMessage, WsRoute};
use crate::domain::ws_route::Outgoing;
use crate::events::Event;
use crate::http::pipeline::{blocked_response, ClientInfo};
use crate::http::server::AppState;
use crate::net::connection::ConnectionGuard;
use crate::observability::{logging, metrics};
use crate::security::{BlockReason, Decision};

/// Whether the request asks for a WebSocket upgrade.
pub fn is_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// `ws://` (or `wss://` for https aliases) URL on the alias host for `path`.
pub fn relay_url(alias: &str, path: &str, query: Option<&str>) -> Option<Url> {
    let mut url = Url::parse(alias).ok()?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme).ok()?;
    url.set_path(path);
    url.set_query(query.filter(|q| !q.is_empty()));
    Some(url)
}

fn forwardable(name: &str) -> bool {
    !matches!(name, "host" | "upgrade" | "connection") && !name.starts_with("sec-websocket-")
}

enum Target {
    Drop,
    Relay(Alias),
    Route(Arc<WsRoute>),
    NotFound,
}

/// Handle an upgrade request.
pub async fn handle(state: &AppState, request: Request<Body>) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let (mut parts, _body) = request.into_parts();
    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let client = ClientInfo::from_request(&parts.headers, parts.uri.host(), peer);
    let path = parts.uri.path().to_string();
    let query = parts.uri.query().map(str::to_string);
    let info = client.request_info(&parts.uri.to_string());

    let domain = state.registry.lookup(&client.host);
    let protection = match &domain {
        Some(domain) => domain.protection().clone(),
        None => state.registry.default_protection().as_ref().clone(),
    };
    let verdict = protection
        .evaluate(state.kv.as_ref(), &client.ip, client.country.as_deref(), &client.user_agent)
        .await;

    let mut decision = verdict.decision;
    if !decision.is_blocked() && protection.policy().is_enabled() {
        if let Some(reason) = state.extensions.ban_decision(&info) {
            decision = Decision::Block(BlockReason::Plugin(reason));
        }
    }
    if let Decision::Block(reason) = decision {
        logging::blocked(
            &client.host,
            parts.method.as_str(),
            &info.url,
            &client.ip,
            client.country.as_deref(),
            &client.user_agent,
        );
        metrics::record_blocked(&reason.to_string());
        let response = blocked_response(&reason);
        state.events.emit(&Event::RequestBlocked {
            request: info,
            reason,
        });
        return response;
    }

    let target = match &domain {
        None => Target::Drop,
        Some(domain) => match domain.settings().alias.clone() {
            Some(alias) => Target::Relay(alias),
            None if domain.ws_routes().is_empty() => Target::Drop,
            None => match domain.find_ws_route(&path) {
                Some(route) => Target::Route(route),
                None => Target::NotFound,
            },
        },
    };

    if matches!(target, Target::Relay(_) | Target::Route(_)) {
        state.events.emit(&Event::ConnectionAccepted {
            domain: client.host.clone(),
            ip: client.ip.clone(),
            path: path.clone(),
        });
    }

    let host = client.host;
    let ip = client.ip;
    let headers = parts.headers;
    upgrade.on_upgrade(move |socket| async move {
        match target {
            Target::Drop => drop(socket),
            Target::NotFound => close_not_found(socket).await,
            Target::Route(route) => run_route(socket, route, &host, ip, path).await,
            Target::Relay(alias) => relay(socket, &alias, &path, query.as_deref(), &headers).await,
        }
    })
}

async fn close_not_found(mut socket: WebSocket) {
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: "Route not found".into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        tracing::debug!(error = %e, "Failed to send close frame");
    }
}

/// Drive one connection on a WS route until either side closes.
async fn run_route(socket: WebSocket, route: Arc<WsRoute>, domain: &str, ip: String, path: String) {
    let guard = ConnectionGuard::open(domain);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = WsClient::new(guard.id(), ip, path, tx);
    let (mut sink, mut stream) = socket.split();

    route.opened(&client);
    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(Outgoing::Message(message)) => {
                    let frame = match message {
                        WsMessage::Text(text) => Message::Text(text.into()),
                        WsMessage::Binary(data) => Message::Binary(data),
                    };
                    if sink.send(frame).await.is_err() {
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => route.message(&client, WsMessage::Text(text.as_str().to_string())),
                Some(Ok(Message::Binary(data))) => route.message(&client, WsMessage::Binary(data)),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(connection = %guard.id(), error = %e, "WebSocket read failed");
                    break;
                }
            },
        }
    }
    drop(rx);
    route.closed(&client);
}

/// Relay frames between the client and the alias upstream.
async fn relay(socket: WebSocket, alias: &Alias, path: &str, query: Option<&str>, headers: &HeaderMap) {
    let Some(url) = relay_url(alias.url(), path, query) else {
        tracing::warn!(alias = %alias.url(), "Invalid alias url for WebSocket relay");
        return;
    };
    let mut request = match url.as_str().into_client_request() {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(upstream = %url, error = %e, "Failed to build relay request");
            return;
        }
    };
    for (name, value) in headers {
        if forwardable(name.as_str()) {
            request.headers_mut().insert(name.clone(), value.clone());
        }
    }

    let upstream = match tokio_tungstenite::connect_async(request).await {
        Ok((upstream, _)) => upstream,
        Err(e) => {
            tracing::debug!(upstream = %url, error = %e, "WebSocket relay connect failed");
            return;
        }
    };

    let (mut client_tx, mut client_rx) = socket.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();
    loop {
        tokio::select! {
            from_client = client_rx.next() => {
                let frame = match from_client {
                    Some(Ok(Message::Text(text))) => tungstenite::Message::text(text.as_str()),
                    Some(Ok(Message::Binary(data))) => tungstenite::Message::binary(data),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    _ => {
                        let _ = upstream_tx.send(tungstenite::Message::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = upstream_tx.send(frame).await {
                    tracing::debug!(error = %e, "Relay to upstream failed");
                    let _ = client_tx.send(Message::Close(None)).await;
                    break;
                }
            }
            from_upstream = upstream_rx.next() => {
                let frame = match from_upstream {
                    Some(Ok(tungstenite::Message::Text(text))) => Message::Text(text.as_str().into()),
                    Some(Ok(tungstenite::Message::Binary(data))) => Message::Binary(data),
                    Some(Ok(tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_)))
                    | Some(Ok(tungstenite::Message::Frame(_))) => continue,
                    _ => {
                        let _ = client_tx.send(Message::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = client_tx.send(frame).await {
                    tracing::debug!(error = %e, "Relay to client failed");
                    let _ = upstream_tx.send(tungstenite::Message::Close(None)).await;
                    break;
                }
            }
        }
    }
}
