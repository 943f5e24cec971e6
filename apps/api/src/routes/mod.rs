pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};

use crate::jobs::handlers;
use crate::state::AppState;

/// Multipart framing overhead allowed on top of the file size limit.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/api/v1/uploads",
            post(handlers::handle_upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route(
            "/api/v1/jobs/:job_id",
            get(handlers::handle_get_job).delete(handlers::handle_cancel_job),
        )
        .route("/api/v1/queue/stats", get(handlers::handle_queue_stats))
        .route("/api/v1/cache/stats", get(handlers::handle_cache_stats))
        .route("/api/v1/cache", delete(handlers::handle_clear_cache))
        .route("/api/v1/cache/warm", post(handlers::handle_warm_cache))
        .with_state(state)
}
