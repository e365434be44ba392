//! HTTP handlers.
//!
//! Thin adapters over [`ServingPipeline`]: bodies arrive as raw bytes so
//! malformed JSON is reported by the pipeline (and counted) rather than
//! rejected by an extractor.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use drift_core::{PredictionResult, ValidationKind};
use drift_metrics::prometheus::CONTENT_TYPE;

use crate::ApiState;
use crate::pipeline::{BatchPrediction, HealthReport, ServeError};

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<ValidationKind>,
    status: u16,
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: self.to_string(),
            kind: self.validation_kind(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

// ── Health ─────────────────────────────────────────────────────────

/// GET /health
pub async fn health(State(state): State<ApiState>) -> Result<Json<HealthReport>, ServeError> {
    state.pipeline.health().map(Json)
}

// ── Scoring ────────────────────────────────────────────────────────

/// POST /predict
pub async fn predict(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<PredictionResult>, ServeError> {
    state.pipeline.predict(&body).map(Json)
}

/// POST /predict/batch
pub async fn predict_batch(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<BatchPrediction>, ServeError> {
    state.pipeline.predict_batch(&body).map(Json)
}

// ── Prometheus ─────────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, CONTENT_TYPE)],
        state.pipeline.metrics_text(),
    )
}
