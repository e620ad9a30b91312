//! WebSocket endpoint feeding browsers from the broadcast hub.
//!
//! Authentication happens before any frames flow: the session token
//! comes from the cookie or a `token` query parameter. An unauthorized
//! client still gets a completed upgrade so the close code is visible
//! to page scripts, then an immediate close with code 4401.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
    routing::any,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::events::Event;
use crate::routes::AppState;
use crate::session::Session;

/// Close code sent to clients that fail session validation.
pub const CLOSE_UNAUTHORIZED: u16 = 4401;

/// Builds the WebSocket router, served on its own port.
pub fn create_ws_router(state: AppState) -> Router {
    Router::new().route("/", any(ws_handler)).with_state(state)
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
) -> Response {
    // Resolve the session before accepting the upgrade so the socket
    // task does not need the headers.
    let session = session_for(&state, &headers, query.token.as_deref());
    ws.on_upgrade(move |socket| handle_websocket(socket, state, session))
}

fn session_for(state: &AppState, headers: &HeaderMap, query_token: Option<&str>) -> Option<Session> {
    if let Some(cookie_header) = headers
        .get(axum::http::header::COOKIE)
        .and_then(|v| v.to_str().ok())
    {
        for pair in cookie_header.split(';') {
            if let Some((name, value)) = pair.split_once('=') {
                if name.trim() == state.config.session_cookie {
                    if let Some(session) = state.sessions.get(value.trim()) {
                        return Some(session);
                    }
                }
            }
        }
    }
    query_token.and_then(|token| state.sessions.get(token))
}

async fn handle_websocket(socket: WebSocket, state: AppState, session: Option<Session>) {
    let (mut sender, mut receiver) = socket.split();

    let Some(session) = session else {
        debug!("websocket rejected, no valid session");
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_UNAUTHORIZED,
                reason: "unauthorized".into(),
            })))
            .await;
        return;
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let client_id = state.hub.register(tx);
    info!(client_id, username = %session.username, "websocket client connected");

    if let Ok(ack) = serde_json::to_string(&Event::connected()) {
        if sender.send(Message::Text(ack.into())).await.is_err() {
            warn!(client_id, "failed to send connected ack");
            state.hub.unregister(client_id);
            return;
        }
    }

    // Pump hub frames out until the client channel is pruned or the
    // socket dies.
    let forward = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    // The inbound direction only watches for close; clients do not send
    // anything meaningful.
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    forward.abort();
    state.hub.unregister(client_id);
    info!(client_id, "websocket client disconnected");
}
