//! Dashboard side channel

use crate::models::ValidatorStats;
use crate::state::AppState;
use axum::{extract::State, Json};
use std::sync::Arc;

/// Currently admitted validators. Read-only, unauthenticated.
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<ValidatorStats> {
    Json(state.stats())
}

pub async fn health_check() -> &'static str {
    "OK"
}
