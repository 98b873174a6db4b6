//! WebSocket connection handler

use crate::client_info::origin_from_request;
use crate::handlers::handle_frame;
use crate::state::AppState;
use crate::websocket::ConnectionHandle;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let origin = origin_from_request(&headers, peer.map(|ConnectInfo(addr)| addr));
    ws.on_upgrade(move |socket| handle_socket(socket, state, origin))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, origin: Option<String>) {
    let (mut sender, mut receiver) = socket.split();
    let (conn, mut outbox) = ConnectionHandle::new();
    let conn_id = conn.id();

    info!("WebSocket connected: {} (origin: {:?})", conn_id, origin);

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = outbox.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize frame: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let state_clone = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    handle_frame(&state_clone, &conn, origin.as_deref(), &text).await;
                }
                Ok(Message::Ping(_)) => {
                    debug!("Received ping from {}", conn_id);
                }
                Ok(Message::Close(_)) => {
                    info!("WebSocket {} closed by client", conn_id);
                    break;
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", conn_id, e);
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Outstanding callbacks for this socket are left to expire
    if let Some(gone) = state.registry.remove(&conn_id) {
        info!(
            "Validator {} disconnected ({} online)",
            gone.validator_id,
            state.registry.len()
        );
    }
    info!("WebSocket disconnected: {}", conn_id);
}
