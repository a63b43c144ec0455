//! Health check endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let queue = state.notifier.queue_status();
    Json(json!({
        "status": "ok",
        "service": "beacon-api",
        "version": env!("CARGO_PKG_VERSION"),
        "queue_length": queue.queue_length,
        "pending_retries": state.notifier.retry_queue_status().pending,
    }))
}
