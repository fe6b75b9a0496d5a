use super::{ApiResult, AppState};
use crate::db;
use crate::errors::Error;
use crate::export;
use crate::ingest::{self, SubmitOutcome};
use crate::metrics::{INVALID_READINGS_TOTAL, READINGS_RECEIVED_TOTAL};
use crate::model::{Reading, SubmitReading};
use crate::stats::{self, Statistics};
use crate::validate::validate_device_id;
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;
const DEFAULT_HOURS: i64 = 24;
const MAX_HOURS: i64 = 24 * 30;

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    device_id: Option<String>,
    hours: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct StatisticsResponse {
    device_id: String,
    hours: i64,
    #[serde(flatten)]
    statistics: Statistics,
}

fn window_hours(hours: Option<i64>) -> Result<i64, Error> {
    let hours = hours.unwrap_or(DEFAULT_HOURS);
    if !(1..=MAX_HOURS).contains(&hours) {
        return Err(Error::Validation(format!(
            "hours must be between 1 and {}",
            MAX_HOURS
        )));
    }
    Ok(hours)
}

pub async fn recent(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<RecentQuery>,
) -> ApiResult<Json<Vec<Reading>>> {
    validate_device_id(&device_id)?;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let readings = db::recent_readings(&state.pool, &device_id, limit).await?;
    Ok(Json(readings))
}

pub async fn history(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<WindowQuery>,
) -> ApiResult<Json<Vec<Reading>>> {
    validate_device_id(&device_id)?;
    let hours = window_hours(params.hours)?;

    let since = Utc::now() - Duration::hours(hours);
    let readings = db::readings_since(&state.pool, Some(&device_id), since).await?;
    Ok(Json(readings))
}

pub async fn statistics(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<WindowQuery>,
) -> ApiResult<Json<StatisticsResponse>> {
    validate_device_id(&device_id)?;
    let hours = window_hours(params.hours)?;

    let since = Utc::now() - Duration::hours(hours);
    let readings = db::readings_since(&state.pool, Some(&device_id), since).await?;

    Ok(Json(StatisticsResponse {
        device_id,
        hours,
        statistics: stats::compute(&readings),
    }))
}

pub async fn submit(
    State(state): State<AppState>,
    Json(request): Json<SubmitReading>,
) -> ApiResult<Json<SubmitOutcome>> {
    READINGS_RECEIVED_TOTAL.with_label_values(&["http"]).inc();

    match ingest::submit(&state.pool, request).await {
        Ok(outcome) => Ok(Json(outcome)),
        Err(e) => {
            if matches!(e, Error::Validation(_)) {
                INVALID_READINGS_TOTAL.inc();
            }
            Err(e.into())
        }
    }
}

pub async fn export_csv(
    State(state): State<AppState>,
    Query(params): Query<ExportQuery>,
) -> ApiResult<impl IntoResponse> {
    if let Some(device_id) = &params.device_id {
        validate_device_id(device_id)?;
    }
    let hours = window_hours(params.hours)?;

    let now = Utc::now();
    let readings =
        db::readings_since(&state.pool, params.device_id.as_deref(), now - Duration::hours(hours))
            .await?;
    let csv = export::readings_csv(&readings)?;

    Ok(csv_response(csv, export::readings_filename(now)))
}

pub(super) fn csv_response(csv: String, filename: String) -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        csv,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_hours() {
        assert_eq!(window_hours(None).unwrap(), 24);
        assert_eq!(window_hours(Some(1)).unwrap(), 1);
        assert_eq!(window_hours(Some(720)).unwrap(), 720);
        assert!(window_hours(Some(0)).is_err());
        assert!(window_hours(Some(-5)).is_err());
        assert!(window_hours(Some(721)).is_err());
    }
}
