//! On-disk model artifact.
//!
//! The artifact is a JSON document wrapping the fitted forest with a
//! format version and the feature count it was trained on. Anything that
//! fails to read back into a usable forest is reported as a corrupt
//! artifact.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use drift_core::N_FEATURES;

use crate::error::ModelError;
use crate::forest::IsolationForest;

/// Artifact layout version written by this build.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub n_features: usize,
    pub forest: IsolationForest,
}

impl ModelArtifact {
    pub fn new(forest: IsolationForest) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            n_features: N_FEATURES,
            forest,
        }
    }

    /// Read and check an artifact. The caller decides what a missing file
    /// means; here every failure is a corrupt artifact.
    pub fn read(path: &Path) -> Result<Self, ModelError> {
        let bytes = std::fs::read(path).map_err(|e| ModelError::corrupt(path, e))?;
        let artifact: ModelArtifact =
            serde_json::from_slice(&bytes).map_err(|e| ModelError::corrupt(path, e))?;

        if artifact.format_version != FORMAT_VERSION {
            return Err(ModelError::corrupt(
                path,
                format!("unsupported format version {}", artifact.format_version),
            ));
        }
        if artifact.n_features != N_FEATURES {
            return Err(ModelError::corrupt(
                path,
                format!(
                    "model expects {} features, service provides {N_FEATURES}",
                    artifact.n_features
                ),
            ));
        }
        artifact
            .forest
            .check()
            .map_err(|reason| ModelError::corrupt(path, reason))?;

        debug!(?path, bytes = bytes.len(), "model artifact read");
        Ok(artifact)
    }

    /// Write the artifact via a sibling temp file and rename, so readers
    /// never observe a half-written file.
    pub fn write(&self, path: &Path) -> Result<(), ModelError> {
        let write_err = |e: &dyn std::fmt::Display| ModelError::Write {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };
        let bytes = serde_json::to_vec(self).map_err(|e| write_err(&e))?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes).map_err(|e| write_err(&e))?;
        std::fs::rename(&tmp, path).map_err(|e| write_err(&e))?;
        debug!(?path, bytes = bytes.len(), "model artifact written");
        Ok(())
    }
}
