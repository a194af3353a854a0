//! Health check and the queue admin surface (`pause`/`resume`/`clear`/
//! `remove`/`force-delete`/`stats`) from §4.C5.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use crate::AppState;

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cache_ok = state.cache.healthy().await;
    Json(json!({ "status": if cache_ok { "ok" } else { "degraded" }, "cache": cache_ok }))
}

pub async fn queue_stats(
    State(state): State<AppState>,
) -> Result<Json<crate::queue::QueueCounts>, (StatusCode, String)> {
    state
        .queue
        .stats()
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

pub async fn queue_pause(State(state): State<AppState>) -> Result<StatusCode, (StatusCode, String)> {
    state
        .queue
        .pause()
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

pub async fn queue_resume(State(state): State<AppState>) -> Result<StatusCode, (StatusCode, String)> {
    state
        .queue
        .resume()
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

pub async fn queue_clear(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    state
        .queue
        .clear()
        .await
        .map(|removed| Json(json!({ "removed": removed })))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

pub async fn queue_remove(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    match state.queue.remove(&job_id).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(e @ crate::error::PipelineError::Conflict(_)) => Err((StatusCode::CONFLICT, e.to_string())),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

pub async fn queue_force_delete(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .queue
        .force_delete(&job_id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
