use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Returns service status plus the cache backend and processor state.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "resume-api",
        "cache_backend": state.cache.backend_name(),
        "processor_running": state.processor.is_running(),
    }))
}
