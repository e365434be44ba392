//! Offline training: synthetic data → isolation forest → artifact + metadata.

use std::path::PathBuf;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;
use serde::Serialize;
use tracing::info;

use drift_core::N_FEATURES;
use drift_core::Settings;
use drift_core::config::{Contamination, MaxSamples, TrainingConfig};

use crate::artifact::ModelArtifact;
use crate::error::ModelError;
use crate::forest::IsolationForest;

/// Summary of a training run.
#[derive(Debug, Clone, Serialize)]
pub struct TrainReport {
    pub model_path: PathBuf,
    pub metadata_path: PathBuf,
    pub n_samples: usize,
    pub n_anomalies: usize,
    /// Fraction of training points the fitted forest labels as outliers.
    pub flagged_fraction: f64,
}

/// Provenance written next to the artifact and served by `/health`.
#[derive(Debug, Serialize)]
struct Metadata<'a> {
    trained_at: String,
    random_seed: u64,
    n_samples: usize,
    n_anomalies: usize,
    n_features: usize,
    model: ModelMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct ModelMetadata<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    n_estimators: usize,
    contamination: &'a Contamination,
    max_samples: &'a MaxSamples,
    random_state: u64,
    offset: f64,
}

/// Draw a Gaussian cluster around the origin plus uniformly placed far
/// outliers, shuffled together.
pub fn make_synthetic_data<R: Rng + ?Sized>(
    cfg: &TrainingConfig,
    rng: &mut R,
) -> Result<Vec<[f64; N_FEATURES]>, ModelError> {
    let n_normal = cfg.n_samples.saturating_sub(cfg.n_anomalies);
    let cluster = Normal::new(0.0, cfg.synthetic.cluster_std).map_err(|e| {
        ModelError::Fit(format!(
            "invalid cluster_std {}: {e}",
            cfg.synthetic.cluster_std
        ))
    })?;
    let (low, high) = (cfg.synthetic.anomaly_low, cfg.synthetic.anomaly_high);

    let mut data: Vec<[f64; N_FEATURES]> = Vec::with_capacity(cfg.n_samples);
    data.extend((0..n_normal).map(|_| std::array::from_fn(|_| rng.sample(cluster))));
    data.extend((0..cfg.n_anomalies).map(|_| std::array::from_fn(|_| rng.gen_range(low..high))));
    data.shuffle(rng);
    Ok(data)
}

/// Generate the training set and fit a forest, both seeded from `cfg`.
pub fn fit_synthetic(
    cfg: &TrainingConfig,
) -> Result<(IsolationForest, Vec<[f64; N_FEATURES]>), ModelError> {
    let data = make_synthetic_data(cfg, &mut StdRng::seed_from_u64(cfg.random_seed))?;
    let mut rng = StdRng::seed_from_u64(cfg.isolation_forest.random_state);
    let forest = IsolationForest::fit(&data, &cfg.isolation_forest, &mut rng)?;
    Ok((forest, data))
}

/// Train on synthetic data and write the model artifact and metadata.
pub fn train_and_save(settings: &Settings) -> anyhow::Result<TrainReport> {
    settings.validate()?;
    let cfg = &settings.training;

    std::fs::create_dir_all(&settings.artifacts_dir).with_context(|| {
        format!("creating artifacts dir {}", settings.artifacts_dir.display())
    })?;
    for path in [&settings.model_path, &settings.metadata_path] {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }

    info!(
        n_samples = cfg.n_samples,
        n_anomalies = cfg.n_anomalies,
        n_estimators = cfg.isolation_forest.n_estimators,
        "training isolation forest"
    );
    let (forest, data) = fit_synthetic(cfg)?;
    let flagged = data.iter().filter(|x| forest.is_outlier(x)).count();
    let offset = forest.offset();

    ModelArtifact::new(forest).write(&settings.model_path)?;

    let metadata = Metadata {
        trained_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        random_seed: cfg.random_seed,
        n_samples: cfg.n_samples,
        n_anomalies: cfg.n_anomalies,
        n_features: cfg.n_features,
        model: ModelMetadata {
            kind: "IsolationForest",
            n_estimators: cfg.isolation_forest.n_estimators,
            contamination: &cfg.isolation_forest.contamination,
            max_samples: &cfg.isolation_forest.max_samples,
            random_state: cfg.isolation_forest.random_state,
            offset,
        },
    };
    std::fs::write(&settings.metadata_path, serde_json::to_vec_pretty(&metadata)?)
        .with_context(|| format!("writing {}", settings.metadata_path.display()))?;

    let report = TrainReport {
        model_path: settings.model_path.clone(),
        metadata_path: settings.metadata_path.clone(),
        n_samples: data.len(),
        n_anomalies: cfg.n_anomalies,
        flagged_fraction: flagged as f64 / data.len() as f64,
    };
    info!(
        model = %report.model_path.display(),
        flagged_fraction = report.flagged_fraction,
        "model trained and saved"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AnomalyModel;
    use drift_core::quality::check_values;

    fn small_settings(dir: &std::path::Path) -> Settings {
        let mut settings = Settings {
            artifacts_dir: dir.to_path_buf(),
            model_path: dir.join("model.json"),
            metadata_path: dir.join("metadata.json"),
            ..Settings::default()
        };
        settings.training.n_samples = 1000;
        settings.training.n_anomalies = 10;
        settings.training.isolation_forest.n_estimators = 50;
        settings
    }

    #[test]
    fn synthetic_data_has_requested_mix() {
        let cfg = TrainingConfig {
            n_samples: 500,
            n_anomalies: 25,
            ..TrainingConfig::default()
        };
        let data = make_synthetic_data(&cfg, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(data.len(), 500);

        let low = cfg.synthetic.anomaly_low;
        let far = data.iter().filter(|x| x.iter().all(|v| *v >= low)).count();
        assert_eq!(far, 25);

        let mean = data.iter().map(|x| x[0]).sum::<f64>() / data.len() as f64;
        // 475 N(0,1) draws plus 25 draws near 10 put the mean near 0.5.
        assert!((0.0..1.0).contains(&mean), "mean was {mean}");
    }

    #[test]
    fn invalid_cluster_std_is_a_fit_error() {
        let mut cfg = TrainingConfig::default();
        cfg.synthetic.cluster_std = -1.0;
        let err = make_synthetic_data(&cfg, &mut StdRng::seed_from_u64(1)).unwrap_err();
        assert!(matches!(err, ModelError::Fit(_)));
        assert!(err.to_string().contains("cluster_std"));
    }

    #[test]
    fn train_and_save_writes_artifact_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let settings = small_settings(&dir.path().join("artifacts"));

        let report = train_and_save(&settings).unwrap();
        assert!(report.model_path.exists());
        assert!(report.metadata_path.exists());
        assert!(report.flagged_fraction > 0.0 && report.flagged_fraction < 0.1);

        let metadata: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&report.metadata_path).unwrap()).unwrap();
        assert_eq!(metadata["n_samples"], 1000);
        assert_eq!(metadata["model"]["type"], "IsolationForest");
        assert_eq!(metadata["model"]["max_samples"], "auto");
        assert!(metadata["trained_at"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn trained_artifact_separates_cluster_from_outliers() {
        let dir = tempfile::tempdir().unwrap();
        let settings = small_settings(dir.path());
        train_and_save(&settings).unwrap();

        let model = AnomalyModel::new();
        assert!(model.load(&settings.model_path).unwrap());
        let results = model
            .predict(&[
                check_values(&[0.1, -0.2, 0.05]).unwrap(),
                check_values(&[9.0, 10.0, 11.0]).unwrap(),
            ])
            .unwrap();
        assert!(!results[0].is_anomaly);
        assert!(results[1].is_anomaly);
        assert!(results[1].anomaly_score > results[0].anomaly_score);
    }

    #[test]
    fn training_is_reproducible() {
        let mut cfg = TrainingConfig {
            n_samples: 300,
            n_anomalies: 6,
            ..TrainingConfig::default()
        };
        cfg.isolation_forest.n_estimators = 10;
        let (a, _) = fit_synthetic(&cfg).unwrap();
        let (b, _) = fit_synthetic(&cfg).unwrap();
        assert_eq!(a, b);
    }
}
