//! Router: health check, realtime WebSocket upgrade, queue admin.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::{queue_handlers, ws_handlers};
use crate::AppState;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(queue_handlers::health))
        .route("/ws/events", get(ws_handlers::ws_events))
        .route("/api/queue/stats", get(queue_handlers::queue_stats))
        .route("/api/queue/pause", post(queue_handlers::queue_pause))
        .route("/api/queue/resume", post(queue_handlers::queue_resume))
        .route("/api/queue/clear", post(queue_handlers::queue_clear))
        .route(
            "/api/queue/jobs/{job_id}",
            axum::routing::delete(queue_handlers::queue_remove),
        )
        .route(
            "/api/queue/jobs/{job_id}/force-delete",
            post(queue_handlers::queue_force_delete),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
