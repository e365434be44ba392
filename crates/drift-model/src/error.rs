//! Error types for model loading and scoring.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    /// `predict` was called before a successful `load`.
    #[error("model not loaded")]
    NotLoaded,

    /// The artifact exists but cannot be turned into a model. Fatal: the
    /// caller must not fall back to treating the model as merely absent.
    #[error("corrupt model artifact at {}: {reason}", path.display())]
    CorruptArtifact { path: PathBuf, reason: String },

    #[error("cannot fit model: {0}")]
    Fit(String),

    #[error("failed to write {}: {reason}", path.display())]
    Write { path: PathBuf, reason: String },
}

impl ModelError {
    pub fn corrupt(path: &std::path::Path, reason: impl ToString) -> Self {
        ModelError::CorruptArtifact {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}
