//! Data-quality gate.
//!
//! Every inbound vector passes through here before the model sees it.
//! The gate checks shape, numeric type, and finiteness, then hands the
//! accepted vectors to any registered [`QualityCheck`] hooks. All
//! functions are pure.

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ValidationError;
use crate::types::{FEATURE_NAMES, FeatureVector, N_FEATURES};

/// Validate a single raw feature vector.
///
/// Accepts either a named object (`{"f1": .., "f2": .., "f3": ..}`) or a
/// positional array of exactly three elements.
pub fn validate(raw: &Value) -> Result<FeatureVector, ValidationError> {
    let result = match raw {
        Value::Object(fields) => from_object(fields),
        Value::Array(items) => from_array(items),
        other => Err(ValidationError::shape(format!(
            "expected a feature object or array, got {}",
            json_type(other)
        ))),
    };

    if let Err(e) = &result {
        debug!(kind = %e.kind, detail = %e.detail, "feature vector rejected");
    }
    result
}

fn from_object(fields: &Map<String, Value>) -> Result<FeatureVector, ValidationError> {
    if let Some(unknown) = fields
        .keys()
        .find(|k| !FEATURE_NAMES.contains(&k.as_str()))
    {
        return Err(ValidationError::shape(format!(
            "unknown feature field '{unknown}'"
        )));
    }

    let mut values = [0.0; N_FEATURES];
    for (slot, name) in values.iter_mut().zip(FEATURE_NAMES) {
        let v = fields.get(name).ok_or_else(|| {
            ValidationError::shape(format!("missing feature field '{name}'"))
        })?;
        *slot = numeric(name, v)?;
    }
    check_values(&values)
}

fn from_array(items: &[Value]) -> Result<FeatureVector, ValidationError> {
    if items.len() != N_FEATURES {
        return Err(arity_error(items.len()));
    }
    let mut values = [0.0; N_FEATURES];
    for ((slot, name), v) in values.iter_mut().zip(FEATURE_NAMES).zip(items) {
        *slot = numeric(name, v)?;
    }
    check_values(&values)
}

/// Shape and finiteness checks for input that is already numeric.
pub fn check_values(values: &[f64]) -> Result<FeatureVector, ValidationError> {
    let arr: [f64; N_FEATURES] = values
        .try_into()
        .map_err(|_| arity_error(values.len()))?;
    FeatureVector::new(arr)
}

/// Validate a non-empty batch of vectors. The first failing vector fails
/// the whole batch; the error names its index.
pub fn validate_batch(raw: &Value) -> Result<Vec<FeatureVector>, ValidationError> {
    let items = match raw {
        Value::Array(items) => items,
        other => {
            return Err(ValidationError::shape(format!(
                "expected an array of instances, got {}",
                json_type(other)
            )));
        }
    };
    if items.is_empty() {
        return Err(ValidationError::empty());
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| validate(item).map_err(|e| e.at_index(i)))
        .collect()
}

fn numeric(name: &str, v: &Value) -> Result<f64, ValidationError> {
    match v {
        Value::Number(n) => n.as_f64().ok_or_else(|| {
            ValidationError::non_finite(format!("feature {name} is not representable as f64"))
        }),
        other => Err(ValidationError::non_numeric(format!(
            "feature {name} must be numeric, got {}",
            json_type(other)
        ))),
    }
}

fn arity_error(len: usize) -> ValidationError {
    ValidationError::shape(format!("expected {N_FEATURES} features, got {len}"))
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── Extension hooks ───────────────────────────────────────────

/// A richer check run after the basic gate has accepted a batch.
pub trait QualityCheck: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, batch: &[FeatureVector]) -> Result<(), ValidationError>;
}

/// Schema expectations beyond shape (ranges, categorical sets).
/// Accepts everything for now.
#[derive(Debug, Default)]
pub struct SchemaCheck;

impl QualityCheck for SchemaCheck {
    fn name(&self) -> &str {
        "schema"
    }

    fn check(&self, _batch: &[FeatureVector]) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Distributional checks against the training data. Accepts everything for now.
#[derive(Debug, Default)]
pub struct DistributionCheck;

impl QualityCheck for DistributionCheck {
    fn name(&self) -> &str {
        "distribution"
    }

    fn check(&self, _batch: &[FeatureVector]) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// The hooks run by default.
pub fn default_checks() -> Vec<Box<dyn QualityCheck>> {
    vec![Box::new(SchemaCheck), Box::new(DistributionCheck)]
}

/// Run every hook in order, stopping at the first rejection.
pub fn run_extended_checks(
    checks: &[Box<dyn QualityCheck>],
    batch: &[FeatureVector],
) -> Result<(), ValidationError> {
    for check in checks {
        check.check(batch)?;
        debug!(check = check.name(), size = batch.len(), "quality check passed");
    }
    Ok(())
}
