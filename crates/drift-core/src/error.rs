//! Error types shared across driftwatch crates.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Why the data-quality gate rejected an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    /// Wrong arity, missing or unknown fields, or not a vector at all.
    Shape,
    /// An element is not an integer or floating-point number.
    NonNumeric,
    /// An element is NaN or infinite.
    NonFinite,
    /// A batch contained no vectors.
    Empty,
}

impl ValidationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationKind::Shape => "shape",
            ValidationKind::NonNumeric => "non_numeric",
            ValidationKind::NonFinite => "non_finite",
            ValidationKind::Empty => "empty",
        }
    }
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client-side input fault. Never retried.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {detail}")]
pub struct ValidationError {
    pub kind: ValidationKind,
    pub detail: String,
}

impl ValidationError {
    pub fn new(kind: ValidationKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn shape(detail: impl Into<String>) -> Self {
        Self::new(ValidationKind::Shape, detail)
    }

    pub fn non_numeric(detail: impl Into<String>) -> Self {
        Self::new(ValidationKind::NonNumeric, detail)
    }

    pub fn non_finite(detail: impl Into<String>) -> Self {
        Self::new(ValidationKind::NonFinite, detail)
    }

    pub fn empty() -> Self {
        Self::new(ValidationKind::Empty, "batch contains no vectors")
    }

    /// Prefix the detail with the position of the offending vector in a batch.
    pub fn at_index(self, index: usize) -> Self {
        Self {
            kind: self.kind,
            detail: format!("instance {index}: {}", self.detail),
        }
    }
}

/// Errors raised while loading the settings file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid settings: {0}")]
    Invalid(String),
}
