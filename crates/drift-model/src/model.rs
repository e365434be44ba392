//! AnomalyModel — lazily loaded, concurrently scored.
//!
//! The held model lives in an `RwLock<ModelState>`. Scoring takes the read
//! lock only long enough to clone the `Arc` of the loaded forest, so
//! steady-state predictions never contend with each other. Loads build the
//! new forest outside any lock and swap it in under a brief write lock; a
//! separate mutex makes concurrent first-access loaders queue up so the
//! artifact is read once.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info, warn};

use drift_core::{FeatureVector, N_FEATURES, PredictionResult};

use crate::artifact::ModelArtifact;
use crate::error::ModelError;
use crate::forest::IsolationForest;

/// What the model slot currently holds.
#[derive(Debug, Clone, Default)]
enum ModelState {
    #[default]
    Unloaded,
    Loaded(Arc<IsolationForest>),
}

#[derive(Debug, Default)]
pub struct AnomalyModel {
    state: RwLock<ModelState>,
    /// Serializes loaders; never held while scoring.
    load_lock: Mutex<()>,
    /// Successful artifact reads.
    loads: AtomicU64,
    /// `predict` calls that reached the forest.
    invocations: AtomicU64,
}

impl AnomalyModel {
    /// A model in the unloaded state.
    pub fn new() -> Self {
        Self::default()
    }

    /// A model that starts out loaded with `forest`.
    pub fn with_forest(forest: IsolationForest) -> Self {
        let model = Self::new();
        model.replace(forest);
        model
    }

    /// Load the artifact at `path`, replacing whatever is held.
    ///
    /// Returns `Ok(false)` if nothing exists at `path`; the held state is
    /// left unchanged. A file that exists but cannot be read back into a
    /// forest is a [`ModelError::CorruptArtifact`], also leaving the state
    /// unchanged.
    pub fn load(&self, path: &Path) -> Result<bool, ModelError> {
        if !path.exists() {
            warn!(path = %path.display(), "model artifact not found");
            return Ok(false);
        }
        let artifact = ModelArtifact::read(path)?;
        let trees = artifact.forest.n_trees();
        self.replace(artifact.forest);
        self.loads.fetch_add(1, Ordering::Relaxed);
        info!(path = %path.display(), trees, "model loaded");
        Ok(true)
    }

    /// Load from `path` unless already loaded. Racing callers queue on the
    /// load lock and re-check, so only the first one reads the artifact.
    pub fn ensure_loaded(&self, path: &Path) -> Result<bool, ModelError> {
        if self.is_loaded() {
            return Ok(true);
        }
        let _guard = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_loaded() {
            debug!("model loaded by a concurrent caller");
            return Ok(true);
        }
        self.load(path)
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*self.read_state(), ModelState::Loaded(_))
    }

    /// Score each vector. Never loads on its own.
    pub fn predict(&self, vectors: &[FeatureVector]) -> Result<Vec<PredictionResult>, ModelError> {
        let forest = self.forest().ok_or(ModelError::NotLoaded)?;
        self.invocations.fetch_add(1, Ordering::Relaxed);
        Ok(vectors.iter().map(|v| score(&forest, v)).collect())
    }

    /// Score a single vector.
    pub fn predict_one(&self, vector: &FeatureVector) -> Result<PredictionResult, ModelError> {
        let forest = self.forest().ok_or(ModelError::NotLoaded)?;
        self.invocations.fetch_add(1, Ordering::Relaxed);
        Ok(score(&forest, vector))
    }

    /// Number of successful artifact loads so far.
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Number of `predict` calls that reached the forest.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Drop the held model.
    #[cfg(test)]
    pub(crate) fn unload(&self) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = ModelState::Unloaded;
    }

    fn forest(&self) -> Option<Arc<IsolationForest>> {
        match &*self.read_state() {
            ModelState::Loaded(forest) => Some(Arc::clone(forest)),
            ModelState::Unloaded => None,
        }
    }

    fn replace(&self, forest: IsolationForest) {
        let loaded = ModelState::Loaded(Arc::new(forest));
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = loaded;
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, ModelState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn score(forest: &IsolationForest, vector: &FeatureVector) -> PredictionResult {
    let decision = forest.decision_function(vector.values());
    PredictionResult {
        anomaly_score: -decision,
        is_anomaly: decision < 0.0,
        n_features: N_FEATURES,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Barrier;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use drift_core::config::{Contamination, IsolationForestConfig};
    use drift_core::quality::check_values;

    fn forest() -> IsolationForest {
        use rand::Rng;

        let mut rng = StdRng::seed_from_u64(42);
        let mut data: Vec<[f64; N_FEATURES]> = (0..400)
            .map(|_| {
                [
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                ]
            })
            .collect();
        data.extend((0..8).map(|i| [9.0 + 0.3 * i as f64, 10.0, 11.0 - 0.2 * i as f64]));
        let params = IsolationForestConfig {
            n_estimators: 50,
            contamination: Contamination::Fraction(0.03),
            ..IsolationForestConfig::default()
        };
        IsolationForest::fit(&data, &params, &mut rng).unwrap()
    }

    fn write_artifact(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("model.json");
        ModelArtifact::new(forest()).write(&path).unwrap();
        path
    }

    fn vector(values: [f64; 3]) -> FeatureVector {
        check_values(&values).unwrap()
    }

    #[test]
    fn starts_unloaded() {
        let model = AnomalyModel::new();
        assert!(!model.is_loaded());
        assert_eq!(model.load_count(), 0);
        assert_eq!(model.invocations(), 0);
    }

    #[test]
    fn load_missing_path_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let model = AnomalyModel::new();
        assert!(!model.load(&dir.path().join("absent.json")).unwrap());
        assert!(!model.is_loaded());
        assert_eq!(model.load_count(), 0);
    }

    #[test]
    fn load_valid_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_artifact(&dir);
        let model = AnomalyModel::new();

        assert!(model.load(&path).unwrap());
        assert!(model.is_loaded());
        assert_eq!(model.load_count(), 1);
    }

    #[test]
    fn corrupt_artifact_is_an_error_not_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, "{\"format_version\": 1").unwrap();

        let model = AnomalyModel::new();
        let err = model.load(&path).unwrap_err();
        assert!(matches!(err, ModelError::CorruptArtifact { .. }));
        assert!(!model.is_loaded());
    }

    #[test]
    fn failed_load_keeps_previous_model() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_artifact(&dir);
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "garbage").unwrap();

        let model = AnomalyModel::new();
        model.load(&good).unwrap();
        assert!(model.load(&bad).is_err());
        assert!(!model.load(&dir.path().join("absent.json")).unwrap());
        assert!(model.is_loaded());
    }

    #[test]
    fn predict_requires_load() {
        let model = AnomalyModel::new();
        let err = model.predict(&[vector([0.0, 0.0, 0.0])]).unwrap_err();
        assert!(matches!(err, ModelError::NotLoaded));
        assert_eq!(model.invocations(), 0);
    }

    #[test]
    fn predict_scores_each_vector() {
        let model = AnomalyModel::with_forest(forest());
        let results = model
            .predict(&[vector([0.1, -0.2, 0.05]), vector([9.0, 10.0, 11.0])])
            .unwrap();

        assert_eq!(results.len(), 2);
        let (normal, outlier) = (results[0], results[1]);
        assert_eq!(normal.n_features, 3);
        assert!(normal.anomaly_score.is_finite());
        assert!(!normal.is_anomaly);
        assert!(outlier.is_anomaly);
        assert!(outlier.anomaly_score > normal.anomaly_score);
        // Positive score ⇔ anomaly.
        for r in results {
            assert_eq!(r.is_anomaly, r.anomaly_score > 0.0);
        }
        assert_eq!(model.invocations(), 1);

        let single = model.predict_one(&vector([9.0, 10.0, 11.0])).unwrap();
        assert_eq!(single, outlier);
        assert_eq!(model.invocations(), 2);
    }

    #[test]
    fn unload_resets_state() {
        let model = AnomalyModel::with_forest(forest());
        model.unload();
        assert!(!model.is_loaded());
    }

    #[test]
    fn concurrent_first_access_loads_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_artifact(&dir);
        let model = Arc::new(AnomalyModel::new());
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let model = model.clone();
                let barrier = barrier.clone();
                let path = path.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    let loaded = model.ensure_loaded(&path).unwrap();
                    let scored = model.predict(&[vector([0.0, 0.0, 0.0])]).unwrap();
                    (loaded, scored.len())
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), (true, 1));
        }
        assert!(model.is_loaded());
        assert_eq!(model.load_count(), 1);
        assert_eq!(model.invocations(), 16);
    }

    #[test]
    fn ensure_loaded_retries_after_artifact_appears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let model = AnomalyModel::new();

        assert!(!model.ensure_loaded(&path).unwrap());
        ModelArtifact::new(forest()).write(&path).unwrap();
        assert!(model.ensure_loaded(&path).unwrap());
        // Already loaded: no second read.
        assert!(model.ensure_loaded(&path).unwrap());
        assert_eq!(model.load_count(), 1);
    }
}
