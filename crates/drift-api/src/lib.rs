//! drift-api — HTTP surface for the driftwatch scoring service.
//!
//! Wraps a [`ServingPipeline`] in axum routes. The pipeline owns every
//! per-request decision (validation, lazy load, metrics accounting); the
//! handlers only translate bytes in and statuses out.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/health` | Liveness, model state, training metadata |
//! | POST | `/predict` | Score one feature vector |
//! | POST | `/predict/batch` | Score a list of feature vectors |
//! | GET | `/metrics` | Prometheus exposition (when monitoring is enabled) |

pub mod handlers;
pub mod pipeline;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

pub use pipeline::{BatchPrediction, HealthReport, ServeError, ServingPipeline};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<ServingPipeline>,
}

/// Build the service router.
pub fn build_router(pipeline: Arc<ServingPipeline>) -> Router {
    let monitoring = pipeline.settings().monitoring.enabled;
    let state = ApiState { pipeline };

    let mut router = Router::new()
        .route(pipeline::HEALTH, get(handlers::health))
        .route(pipeline::PREDICT, post(handlers::predict))
        .route(pipeline::PREDICT_BATCH, post(handlers::predict_batch));
    if monitoring {
        router = router.route(pipeline::METRICS, get(handlers::prometheus_metrics));
    }
    router.with_state(state)
}
