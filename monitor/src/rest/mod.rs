mod alerts;
mod devices;
mod maintenance;
mod readings;

use crate::errors::Error;
use crate::metrics;
use axum::{
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use sqlx::PgPool;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

#[derive(Debug, Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub offline_threshold: Duration,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(Any);

    let api = Router::new()
        .route("/summary", get(maintenance::summary))
        .route(
            "/devices",
            get(devices::list_devices).post(devices::register_device),
        )
        .route("/devices/:device_id", get(devices::get_device))
        .route("/devices/:device_id/status", put(devices::update_status))
        .route("/devices/:device_id/readings", get(readings::recent))
        .route("/devices/:device_id/readings/history", get(readings::history))
        .route("/devices/:device_id/statistics", get(readings::statistics))
        .route("/readings", post(readings::submit))
        .route("/readings/export", get(readings::export_csv))
        .route("/alerts", get(alerts::unresolved))
        .route("/alerts/all", get(alerts::all))
        .route("/alerts/export", get(alerts::export_csv))
        .route("/alerts/:id/resolve", post(alerts::resolve))
        .route("/maintenance/offline-check", post(maintenance::offline_check));

    Router::new()
        .route("/health", get(maintenance::health))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}

/// Error returned by handlers, rendered as `{"error", "code"}` JSON.
pub struct AppError(Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self.0 {
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND", self.0.to_string()),
            Error::Json(e) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", e.to_string()),
            other => {
                error!("API error: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

pub type ApiResult<T> = Result<T, AppError>;
