pub mod face;
pub mod health;
pub mod metrics;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::models::face::ErrorResponse;
use crate::services::orchestrator::FaceMatchError;
use crate::services::recognition::RecognitionError;

/// Build the API router with all middleware layers applied.
pub fn router(state: AppState, prometheus: Arc<PrometheusHandle>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/face/register-base", post(face::register_base))
        .route("/face/compare-folder", post(face::compare_folder))
        .route("/face/job-status/{job_id}", get(face::job_status))
        .route("/face/clear-reference/{session_id}", delete(face::clear_reference))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(prometheus),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024)) // 10 MB limit
}

/// Error returned by handlers; always rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    Face(FaceMatchError),
}

impl From<FaceMatchError> for ApiError {
    fn from(err: FaceMatchError) -> Self {
        ApiError::Face(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Face(err) => match err {
                FaceMatchError::InvalidInput(_)
                | FaceMatchError::InvalidFolderLink(_)
                | FaceMatchError::FolderAccess(_)
                | FaceMatchError::NoImages => StatusCode::BAD_REQUEST,
                FaceMatchError::JobNotFound => StatusCode::NOT_FOUND,
                FaceMatchError::Recognition(RecognitionError::Unavailable(_)) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                FaceMatchError::Recognition(RecognitionError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
                FaceMatchError::Recognition(RecognitionError::Rejected(_)) => StatusCode::BAD_REQUEST,
                FaceMatchError::Recognition(_) | FaceMatchError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Unauthorized => "Missing or invalid Authorization header".to_string(),
            ApiError::Face(err) => err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self.message(), "Request failed");
        }
        (status, Json(ErrorResponse { error: self.message() })).into_response()
    }
}
