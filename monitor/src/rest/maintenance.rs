use super::{ApiResult, AppState};
use crate::db;
use crate::model::Summary;
use crate::sweep;
use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use tracing::warn;

/// Runs the offline sweep on demand.
pub async fn offline_check(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let report = sweep::run_sweep(&state.pool, state.offline_threshold).await?;

    Ok(Json(json!({
        "success": true,
        "offline_count": report.marked_offline,
        "checked": report.checked,
        "message": report.message(),
    })))
}

pub async fn summary(State(state): State<AppState>) -> ApiResult<Json<Summary>> {
    Ok(Json(db::summary(&state.pool).await?))
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match db::ping(&state.pool).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => {
            warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}
