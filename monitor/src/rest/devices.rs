use super::{ApiResult, AppState};
use crate::db;
use crate::errors::Error;
use crate::model::{Device, RegisterDevice, UpdateStatus};
use crate::status;
use crate::validate::{validate_device_id, validate_registration};
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

pub async fn list_devices(State(state): State<AppState>) -> ApiResult<Json<Vec<Device>>> {
    Ok(Json(db::list_devices(&state.pool).await?))
}

pub async fn get_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<Device>> {
    validate_device_id(&device_id)?;
    let device = db::get_device(&state.pool, &device_id)
        .await?
        .ok_or_else(|| Error::device_not_found(&device_id))?;
    Ok(Json(device))
}

pub async fn register_device(
    State(state): State<AppState>,
    Json(request): Json<RegisterDevice>,
) -> ApiResult<Json<Value>> {
    validate_registration(&request)?;

    let device = db::upsert_device(&state.pool, &request, Utc::now()).await?;
    info!(
        "Registered device {} ({:?}) at {}",
        device.device_id, device.device_type, device.location
    );

    Ok(Json(json!({ "success": true, "device": device })))
}

/// Sets a device status. Entering `error` raises an error alert.
pub async fn update_status(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(request): Json<UpdateStatus>,
) -> ApiResult<Json<Value>> {
    validate_device_id(&device_id)?;

    let change = status::change_status(&state.pool, &device_id, request.status)
        .await?
        .ok_or_else(|| Error::device_not_found(&device_id))?;

    Ok(Json(json!({ "success": true, "device": change.device })))
}
