use super::readings::csv_response;
use super::{ApiResult, AppState};
use crate::db;
use crate::errors::Error;
use crate::export;
use crate::model::Alert;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

pub async fn unresolved(State(state): State<AppState>) -> ApiResult<Json<Vec<Alert>>> {
    Ok(Json(db::unresolved_alerts(&state.pool).await?))
}

pub async fn all(State(state): State<AppState>) -> ApiResult<Json<Vec<Alert>>> {
    Ok(Json(db::all_alerts(&state.pool).await?))
}

pub async fn resolve(
    State(state): State<AppState>,
    Path(alert_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let alert = db::resolve_alert(&state.pool, alert_id, Utc::now())
        .await?
        .ok_or_else(|| Error::alert_not_found(alert_id))?;
    info!("Alert {} for {} resolved", alert.id, alert.device_id);

    Ok(Json(json!({ "success": true, "alert": alert })))
}

pub async fn export_csv(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let alerts = db::all_alerts(&state.pool).await?;
    let csv = export::alerts_csv(&alerts)?;
    Ok(csv_response(csv, export::alerts_filename(Utc::now())))
}
