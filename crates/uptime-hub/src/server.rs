//! HTTP / WebSocket server wiring

use crate::api;
use crate::scheduler::{spawn_callback_purge, spawn_sweep_loop};
use crate::state::AppState;
use crate::websocket::handler::ws_handler;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Validators connect on the root path
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/stats", get(api::stats::get_stats))
        .route("/health", get(api::stats::health_check))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Start the background loops and serve until the listener fails
pub async fn run(listener: TcpListener, state: Arc<AppState>) -> anyhow::Result<()> {
    let sweep = spawn_sweep_loop(state.clone());
    let purge = spawn_callback_purge(state.clone());

    let app = build_router(state);
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await;

    sweep.abort();
    if let Some(purge) = purge {
        purge.abort();
    }
    result?;
    Ok(())
}
