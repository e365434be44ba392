//! Serving pipeline: receive → validate → ensure loaded → score → record.
//!
//! Transport-agnostic. Handlers pass raw request bytes in and map the
//! outcome to HTTP; every outcome, success or failure, is counted in
//! `requests_total` under its own status, and latency is observed by a
//! drop guard on every exit path.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use drift_core::quality::{self, QualityCheck};
use drift_core::{FeatureVector, PredictionResult, Settings, ValidationError, ValidationKind};
use drift_metrics::MetricsRegistry;
use drift_model::{AnomalyModel, ModelError};

pub const HEALTH: &str = "/health";
pub const PREDICT: &str = "/predict";
pub const PREDICT_BATCH: &str = "/predict/batch";
pub const METRICS: &str = "/metrics";

#[derive(Debug, Error)]
pub enum ServeError {
    /// The body is not JSON or lacks the expected envelope.
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No artifact is available yet.
    #[error("model unavailable: no artifact has been loaded")]
    Unavailable,

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl ServeError {
    /// HTTP status for this outcome.
    pub fn status(&self) -> u16 {
        match self {
            ServeError::Malformed(_) => 400,
            ServeError::Validation(_) => 422,
            ServeError::Unavailable | ServeError::Model(ModelError::NotLoaded) => 503,
            ServeError::Model(_) => 500,
        }
    }

    pub fn validation_kind(&self) -> Option<ValidationKind> {
        match self {
            ServeError::Validation(e) => Some(e.kind),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub model_loaded: bool,
    pub env: String,
    /// Training metadata object, or `null` when none is available.
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchPrediction {
    pub predictions: Vec<PredictionResult>,
}

pub struct ServingPipeline {
    settings: Arc<Settings>,
    model: Arc<AnomalyModel>,
    metrics: Arc<MetricsRegistry>,
    checks: Vec<Box<dyn QualityCheck>>,
}

impl ServingPipeline {
    pub fn new(
        settings: Arc<Settings>,
        model: Arc<AnomalyModel>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self::with_checks(settings, model, metrics, quality::default_checks())
    }

    pub fn with_checks(
        settings: Arc<Settings>,
        model: Arc<AnomalyModel>,
        metrics: Arc<MetricsRegistry>,
        checks: Vec<Box<dyn QualityCheck>>,
    ) -> Self {
        metrics.set_model_loaded(model.is_loaded());
        Self {
            settings,
            model,
            metrics,
            checks,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn model(&self) -> &AnomalyModel {
        &self.model
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Load the artifact if not yet loaded and sync the `model_loaded` gauge.
    pub fn ensure_loaded(&self) -> Result<bool, ModelError> {
        let result = self.model.ensure_loaded(&self.settings.model_path);
        self.metrics.set_model_loaded(self.model.is_loaded());
        result
    }

    // ── Operations ─────────────────────────────────────────────────

    /// Score one vector from `{"features": {...}}` or a bare feature object.
    pub fn predict(&self, body: &[u8]) -> Result<PredictionResult, ServeError> {
        let _timer = self.metrics.start_timer(PREDICT);
        let outcome = self.score_one(body);
        self.record_scored(PREDICT, "POST", outcome, |r| u64::from(r.is_anomaly))
    }

    /// Score `{"instances": [[f1, f2, f3], ...]}`.
    pub fn predict_batch(&self, body: &[u8]) -> Result<BatchPrediction, ServeError> {
        let _timer = self.metrics.start_timer(PREDICT_BATCH);
        let outcome = self.score_batch(body);
        self.record_scored(PREDICT_BATCH, "POST", outcome, |b| {
            b.predictions.iter().filter(|r| r.is_anomaly).count() as u64
        })
    }

    /// Liveness plus model state. Triggers the lazy load.
    pub fn health(&self) -> Result<HealthReport, ServeError> {
        let _timer = self.metrics.start_timer(HEALTH);
        let outcome = self
            .ensure_loaded()
            .map(|model_loaded| HealthReport {
                status: "ok",
                model_loaded,
                env: self.settings.service.env.clone(),
                metadata: self.read_metadata(),
            })
            .map_err(ServeError::from);
        self.record(HEALTH, "GET", outcome)
    }

    /// Prometheus exposition. The scrape counts itself before rendering.
    pub fn metrics_text(&self) -> String {
        let _timer = self.metrics.start_timer(METRICS);
        self.metrics.increment_request(METRICS, "GET", 200);
        self.metrics.render()
    }

    // ── Stages ─────────────────────────────────────────────────────

    fn score_one(&self, body: &[u8]) -> Result<PredictionResult, ServeError> {
        let raw = parse_body(body)?;
        let features = match raw {
            Value::Object(mut map) if map.contains_key("features") => {
                map.remove("features").unwrap_or(Value::Null)
            }
            other => other,
        };
        let vector = quality::validate(&features)?;
        self.admit(std::slice::from_ref(&vector))?;
        Ok(self.model.predict_one(&vector)?)
    }

    fn score_batch(&self, body: &[u8]) -> Result<BatchPrediction, ServeError> {
        let raw = parse_body(body)?;
        let instances = raw
            .get("instances")
            .ok_or_else(|| ServeError::Malformed("expected an \"instances\" field".to_string()))?;
        let batch = quality::validate_batch(instances)?;
        self.admit(&batch)?;
        let predictions = self.model.predict(&batch)?;
        Ok(BatchPrediction { predictions })
    }

    /// Extended checks, then the lazy load. Runs after the basic gate and
    /// before anything touches the forest.
    fn admit(&self, batch: &[FeatureVector]) -> Result<(), ServeError> {
        quality::run_extended_checks(&self.checks, batch)?;
        if !self.ensure_loaded()? {
            return Err(ServeError::Unavailable);
        }
        Ok(())
    }

    fn read_metadata(&self) -> Option<Value> {
        let path = &self.settings.metadata_path;
        if !path.exists() {
            return None;
        }
        let parsed = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|e| e.to_string()))
            .and_then(|value: Value| match value {
                Value::Object(_) => Ok(value),
                _ => Err("expected a JSON object".to_string()),
            });
        match parsed {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(path = %path.display(), %error, "ignoring unreadable model metadata");
                None
            }
        }
    }

    // ── Accounting ─────────────────────────────────────────────────

    fn record_scored<T>(
        &self,
        endpoint: &str,
        method: &str,
        outcome: Result<T, ServeError>,
        anomalies: impl FnOnce(&T) -> u64,
    ) -> Result<T, ServeError> {
        if let Ok(value) = &outcome {
            self.metrics.increment_anomalies(endpoint, anomalies(value));
        }
        self.record(endpoint, method, outcome)
    }

    fn record<T>(
        &self,
        endpoint: &str,
        method: &str,
        outcome: Result<T, ServeError>,
    ) -> Result<T, ServeError> {
        let status = match &outcome {
            Ok(_) => 200,
            Err(e) => {
                let status = e.status();
                if status >= 500 {
                    warn!(endpoint, status, error = %e, "request failed");
                } else {
                    debug!(endpoint, status, error = %e, "request rejected");
                }
                status
            }
        };
        self.metrics.increment_request(endpoint, method, status);
        outcome
    }
}

fn parse_body(body: &[u8]) -> Result<Value, ServeError> {
    serde_json::from_slice(body).map_err(|e| ServeError::Malformed(format!("invalid JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use drift_core::config::TrainingConfig;
    use drift_model::ModelArtifact;
    use drift_model::train::fit_synthetic;

    fn settings(dir: &Path) -> Settings {
        Settings {
            artifacts_dir: dir.to_path_buf(),
            model_path: dir.join("model.json"),
            metadata_path: dir.join("metadata.json"),
            ..Settings::default()
        }
    }

    fn write_model(path: &Path) {
        let mut cfg = TrainingConfig {
            n_samples: 800,
            n_anomalies: 8,
            ..TrainingConfig::default()
        };
        cfg.isolation_forest.n_estimators = 50;
        let (forest, _) = fit_synthetic(&cfg).unwrap();
        ModelArtifact::new(forest).write(path).unwrap();
    }

    fn pipeline(settings: Settings) -> ServingPipeline {
        ServingPipeline::new(
            Arc::new(settings),
            Arc::new(AnomalyModel::new()),
            Arc::new(MetricsRegistry::default()),
        )
    }

    fn trained(dir: &Path) -> ServingPipeline {
        let settings = settings(dir);
        write_model(&settings.model_path);
        pipeline(settings)
    }

    #[test]
    fn predict_accepts_envelope_and_bare_object() {
        let dir = tempfile::tempdir().unwrap();
        let p = trained(dir.path());

        let a = p.predict(br#"{"features": {"f1": 0.1, "f2": -0.2, "f3": 0.05}}"#).unwrap();
        let b = p.predict(br#"{"f1": 0.1, "f2": -0.2, "f3": 0.05}"#).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_anomaly);
        assert_eq!(a.n_features, 3);
        assert_eq!(p.metrics().request_count(PREDICT, "POST", 200), 2);
        assert_eq!(p.metrics().latency_count(PREDICT), 2);
    }

    #[test]
    fn anomaly_is_counted() {
        let dir = tempfile::tempdir().unwrap();
        let p = trained(dir.path());

        let r = p.predict(br#"{"f1": 9, "f2": 10, "f3": 11}"#).unwrap();
        assert!(r.is_anomaly);
        assert_eq!(p.metrics().anomaly_count(PREDICT), 1);
    }

    #[test]
    fn malformed_json_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let p = trained(dir.path());

        let err = p.predict(b"{not json").unwrap_err();
        assert_eq!(err.status(), 400);
        assert_eq!(p.metrics().request_count(PREDICT, "POST", 400), 1);
        assert_eq!(p.metrics().latency_count(PREDICT), 1);
    }

    #[test]
    fn invalid_vector_never_reaches_model() {
        let dir = tempfile::tempdir().unwrap();
        let p = trained(dir.path());

        let err = p.predict(br#"{"features": {"f1": "x", "f2": 0, "f3": 0}}"#).unwrap_err();
        assert_eq!(err.status(), 422);
        assert_eq!(err.validation_kind(), Some(ValidationKind::NonNumeric));
        assert_eq!(p.model().invocations(), 0);
        // The gate runs before the lazy load.
        assert!(!p.model().is_loaded());
        assert_eq!(p.metrics().request_count(PREDICT, "POST", 422), 1);
        assert_eq!(p.metrics().request_count(PREDICT, "POST", 200), 0);
        assert_eq!(p.metrics().anomaly_count(PREDICT), 0);
    }

    #[test]
    fn missing_artifact_is_503() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(settings(dir.path()));

        let err = p.predict(br#"{"f1": 0, "f2": 0, "f3": 0}"#).unwrap_err();
        assert!(matches!(err, ServeError::Unavailable));
        assert_eq!(err.status(), 503);
        assert!(!p.metrics().model_loaded());
    }

    #[test]
    fn corrupt_artifact_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        std::fs::write(&settings.model_path, "{").unwrap();
        let p = pipeline(settings);

        let err = p.predict(br#"{"f1": 0, "f2": 0, "f3": 0}"#).unwrap_err();
        assert_eq!(err.status(), 500);
        assert_eq!(p.health().unwrap_err().status(), 500);
        assert_eq!(p.metrics().request_count(HEALTH, "GET", 500), 1);
    }

    #[test]
    fn health_loads_model_and_reports_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        std::fs::write(&settings.metadata_path, r#"{"n_samples": 800}"#).unwrap();
        let p = trained(dir.path());
        assert!(!p.metrics().model_loaded());

        let report = p.health().unwrap();
        assert_eq!(report.status, "ok");
        assert!(report.model_loaded);
        assert_eq!(report.env, "dev");
        assert_eq!(report.metadata.unwrap()["n_samples"], 800);
        assert!(p.metrics().model_loaded());
        assert_eq!(p.metrics().request_count(HEALTH, "GET", 200), 1);
    }

    #[test]
    fn health_without_metadata_reports_null() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(settings(dir.path()));

        let body = serde_json::to_value(p.health().unwrap()).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["model_loaded"], false);
        let metadata = body.get("metadata").expect("metadata key present");
        assert!(metadata.is_null());
    }

    #[test]
    fn non_object_metadata_degrades_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let p = trained(dir.path());
        for doc in ["[1, 2, 3]", "42", "\"trained\""] {
            std::fs::write(&p.settings().metadata_path, doc).unwrap();
            let report = p.health().unwrap();
            assert!(report.metadata.is_none(), "accepted {doc}");
            let body = serde_json::to_value(&report).unwrap();
            assert!(body["metadata"].is_null());
        }
    }

    #[test]
    fn unreadable_metadata_degrades_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let p = trained(dir.path());
        std::fs::write(&p.settings().metadata_path, "not json").unwrap();

        let report = p.health().unwrap();
        assert!(report.model_loaded);
        assert!(report.metadata.is_none());
    }

    #[test]
    fn batch_scores_every_instance() {
        let dir = tempfile::tempdir().unwrap();
        let p = trained(dir.path());

        let batch = p
            .predict_batch(br#"{"instances": [[0.1, -0.2, 0.05], [9, 10, 11]]}"#)
            .unwrap();
        assert_eq!(batch.predictions.len(), 2);
        assert!(batch.predictions[1].is_anomaly);
        assert_eq!(p.metrics().anomaly_count(PREDICT_BATCH), 1);
    }

    #[test]
    fn batch_rejects_empty_and_missing_instances() {
        let dir = tempfile::tempdir().unwrap();
        let p = trained(dir.path());

        let empty = p.predict_batch(br#"{"instances": []}"#).unwrap_err();
        assert_eq!(empty.validation_kind(), Some(ValidationKind::Empty));
        let missing = p.predict_batch(br#"{"rows": []}"#).unwrap_err();
        assert_eq!(missing.status(), 400);
        assert_eq!(p.model().invocations(), 0);
    }

    #[test]
    fn extended_check_rejection_stops_scoring() {
        struct RejectAll;
        impl QualityCheck for RejectAll {
            fn name(&self) -> &str {
                "reject-all"
            }
            fn check(&self, _batch: &[FeatureVector]) -> Result<(), ValidationError> {
                Err(ValidationError::shape("rejected by policy"))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        write_model(&settings.model_path);
        let p = ServingPipeline::with_checks(
            Arc::new(settings),
            Arc::new(AnomalyModel::new()),
            Arc::new(MetricsRegistry::default()),
            vec![Box::new(RejectAll)],
        );

        let err = p.predict(br#"{"f1": 0, "f2": 0, "f3": 0}"#).unwrap_err();
        assert_eq!(err.status(), 422);
        assert_eq!(p.model().invocations(), 0);
    }

    #[test]
    fn metrics_scrape_counts_itself() {
        let dir = tempfile::tempdir().unwrap();
        let p = trained(dir.path());

        let text = p.metrics_text();
        assert!(text.contains("requests_total{endpoint=\"/metrics\",method=\"GET\",status=\"200\"} 1\n"));
    }
}
