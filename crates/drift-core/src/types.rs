//! Request-scoped data model: feature vectors in, predictions out.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Number of features the model is trained on.
pub const N_FEATURES: usize = 3;

/// Field names of a single feature object, in vector order.
pub const FEATURE_NAMES: [&str; N_FEATURES] = ["f1", "f2", "f3"];

/// Exactly three finite values. Only obtainable through validation, so
/// holding one is proof that the gate accepted it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(into = "[f64; 3]")]
pub struct FeatureVector([f64; N_FEATURES]);

impl FeatureVector {
    /// Build a vector, rejecting NaN and infinities.
    pub fn new(values: [f64; N_FEATURES]) -> Result<Self, ValidationError> {
        for (name, v) in FEATURE_NAMES.iter().zip(values.iter()) {
            if !v.is_finite() {
                return Err(ValidationError::non_finite(format!(
                    "feature {name} must be finite, got {v}"
                )));
            }
        }
        Ok(Self(values))
    }

    pub fn values(&self) -> &[f64; N_FEATURES] {
        &self.0
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

impl From<FeatureVector> for [f64; N_FEATURES] {
    fn from(v: FeatureVector) -> Self {
        v.0
    }
}

/// Score for a single vector.
///
/// `anomaly_score` is the negated decision function of the forest: larger
/// means more anomalous, and it is positive exactly when `is_anomaly` is set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub anomaly_score: f64,
    pub is_anomaly: bool,
    pub n_features: usize,
}
