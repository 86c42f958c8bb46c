//! WebSocket proxy handling.
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Proxy ←──── WebSocket frames ────→ Backend
//! ```
//!
//! # Design Decisions
//! - The upstream handshake completes before the client is upgraded, so a
//!   dead backend still gets a proper error response
//! - Message-level forwarding, no buffering
//! - Close frames propagated in both directions, either side closing ends
//!   the bridge

use axum::extract::ws::{self, WebSocket};
use axum::http::{header, HeaderName};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, client::IntoClientRequest, protocol::CloseFrame};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{ProxyError, Result};
use crate::http::forward::Inbound;
use crate::proxy::ForwardPlan;

pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handshake headers generated per connection, never copied from the client.
const HANDSHAKE: [HeaderName; 3] = [
    header::SEC_WEBSOCKET_KEY,
    header::SEC_WEBSOCKET_VERSION,
    header::SEC_WEBSOCKET_EXTENSIONS,
];

/// Open the upstream side. Returns the socket and the subprotocol the
/// backend accepted.
pub async fn connect_upstream(
    url: &str,
    inbound: &Inbound<'_>,
    plan: &ForwardPlan,
    xfwd: bool,
) -> Result<(UpstreamSocket, Option<String>)> {
    let mut request = url
        .into_client_request()
        .map_err(|e| ProxyError::config(format!("invalid websocket upstream {}: {}", url, e)))?;

    for (name, value) in inbound.upstream_headers(plan, xfwd).iter() {
        if !HANDSHAKE.contains(name) {
            request.headers_mut().insert(name.clone(), value.clone());
        }
    }

    let (socket, response) = tokio_tungstenite::connect_async(request).await.map_err(|e| {
        tracing::error!(upstream = %plan.target, error = %e, "WebSocket upstream handshake failed");
        ProxyError::UpstreamUnreachable {
            target: plan.target.to_string(),
            reason: e.to_string(),
            refused: matches!(e, tungstenite::Error::Io(_)),
        }
    })?;

    let protocol = response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Ok((socket, protocol))
}

/// Pump messages both ways until either side closes.
pub async fn bridge(client: WebSocket, upstream: UpstreamSocket) {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let client_to_upstream = async {
        while let Some(Ok(message)) = client_rx.next().await {
            let closing = matches!(message, ws::Message::Close(_));
            if upstream_tx.send(to_upstream(message)).await.is_err() || closing {
                break;
            }
        }
    };

    let upstream_to_client = async {
        while let Some(Ok(message)) = upstream_rx.next().await {
            let Some(message) = to_client(message) else {
                continue;
            };
            let closing = matches!(message, ws::Message::Close(_));
            if client_tx.send(message).await.is_err() || closing {
                break;
            }
        }
    };

    tokio::select! {
        _ = client_to_upstream => tracing::debug!("WebSocket closed by client"),
        _ = upstream_to_client => tracing::debug!("WebSocket closed by upstream"),
    }
}

fn to_upstream(message: ws::Message) -> tungstenite::Message {
    match message {
        ws::Message::Text(text) => tungstenite::Message::text(text.as_str().to_owned()),
        ws::Message::Binary(data) => tungstenite::Message::Binary(data),
        ws::Message::Ping(data) => tungstenite::Message::Ping(data),
        ws::Message::Pong(data) => tungstenite::Message::Pong(data),
        ws::Message::Close(frame) => tungstenite::Message::Close(frame.map(|f| CloseFrame {
            code: f.code.into(),
            reason: f.reason.as_str().to_owned().into(),
        })),
    }
}

fn to_client(message: tungstenite::Message) -> Option<ws::Message> {
    let message = match message {
        tungstenite::Message::Text(text) => ws::Message::Text(text.as_str().to_owned().into()),
        tungstenite::Message::Binary(data) => ws::Message::Binary(data),
        tungstenite::Message::Ping(data) => ws::Message::Ping(data),
        tungstenite::Message::Pong(data) => ws::Message::Pong(data),
        tungstenite::Message::Close(frame) => ws::Message::Close(frame.map(|f| ws::CloseFrame {
            code: f.code.into(),
            reason: f.reason.as_str().to_owned().into(),
        })),
        // raw frames only show up when writing, never when reading
        tungstenite::Message::Frame(_) => return None,
    };
    Some(message)
}
