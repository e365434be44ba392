//! settings.toml parser.
//!
//! Settings are loaded once by the daemon and shared read-only as
//! `Arc<Settings>`. Every section has defaults, so an empty file is valid.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::types::N_FEATURES;

/// Environment variable that overrides the settings file location.
pub const SETTINGS_ENV: &str = "DRIFT_SETTINGS";

/// Settings file used when neither the env var nor `--config` is given.
pub const DEFAULT_SETTINGS_PATH: &str = "config/settings.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub artifacts_dir: PathBuf,
    pub model_path: PathBuf,
    pub metadata_path: PathBuf,
    pub training: TrainingConfig,
    pub service: ServiceConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub random_seed: u64,
    pub n_samples: usize,
    pub n_anomalies: usize,
    pub n_features: usize,
    pub isolation_forest: IsolationForestConfig,
    pub synthetic: SyntheticConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationForestConfig {
    pub n_estimators: usize,
    pub contamination: Contamination,
    pub max_samples: MaxSamples,
    pub random_state: u64,
}

/// Expected outlier fraction, or `"auto"` for the fixed −0.5 offset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Contamination {
    Fraction(f64),
    Auto(AutoTag),
}

/// Sub-sample size per tree, or `"auto"` for `min(256, n_samples)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaxSamples {
    Count(usize),
    Auto(AutoTag),
}

/// The literal string `"auto"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoTag {
    Auto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub cluster_std: f64,
    pub anomaly_low: f64,
    pub anomaly_high: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub env: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub latency_buckets: Vec<f64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from("artifacts"),
            model_path: PathBuf::from("artifacts/model.json"),
            metadata_path: PathBuf::from("artifacts/metadata.json"),
            training: TrainingConfig::default(),
            service: ServiceConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            random_seed: 42,
            n_samples: 5000,
            n_anomalies: 50,
            n_features: N_FEATURES,
            isolation_forest: IsolationForestConfig::default(),
            synthetic: SyntheticConfig::default(),
        }
    }
}

impl Default for IsolationForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            contamination: Contamination::Fraction(0.02),
            max_samples: MaxSamples::Auto(AutoTag::Auto),
            random_state: 42,
        }
    }
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            cluster_std: 1.0,
            anomaly_low: 8.0,
            anomaly_high: 12.0,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            env: "dev".to_string(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            latency_buckets: vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0],
        }
    }
}

impl Settings {
    /// Parse and validate a settings file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        debug!(?path, "settings loaded");
        Ok(settings)
    }

    /// Resolve the settings location and load it.
    ///
    /// `DRIFT_SETTINGS` wins over `explicit`. A file named by either must
    /// exist; when neither is set and the default file is absent, built-in
    /// defaults are used.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var_os(SETTINGS_ENV).map(PathBuf::from);
        match from_env.as_deref().or(explicit) {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_SETTINGS_PATH);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    warn!(path = %default.display(), "settings file not found, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    /// Check cross-field invariants the type system cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let buckets = &self.monitoring.latency_buckets;
        if buckets.is_empty() {
            return Err(ConfigError::Invalid(
                "monitoring.latency_buckets must not be empty".to_string(),
            ));
        }
        if buckets.iter().any(|b| !b.is_finite()) {
            return Err(ConfigError::Invalid(
                "monitoring.latency_buckets must be finite".to_string(),
            ));
        }
        if buckets.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::Invalid(
                "monitoring.latency_buckets must be strictly ascending".to_string(),
            ));
        }

        let training = &self.training;
        if training.n_features != N_FEATURES {
            return Err(ConfigError::Invalid(format!(
                "training.n_features must be {N_FEATURES}, got {}",
                training.n_features
            )));
        }
        if training.n_anomalies >= training.n_samples {
            return Err(ConfigError::Invalid(format!(
                "training.n_anomalies ({}) must be below n_samples ({})",
                training.n_anomalies, training.n_samples
            )));
        }
        if training.isolation_forest.n_estimators == 0 {
            return Err(ConfigError::Invalid(
                "training.isolation_forest.n_estimators must be positive".to_string(),
            ));
        }
        if let Contamination::Fraction(c) = training.isolation_forest.contamination {
            if !(c > 0.0 && c <= 0.5) {
                return Err(ConfigError::Invalid(format!(
                    "training.isolation_forest.contamination must be in (0, 0.5], got {c}"
                )));
            }
        }
        if let MaxSamples::Count(0) = training.isolation_forest.max_samples {
            return Err(ConfigError::Invalid(
                "training.isolation_forest.max_samples must be positive".to_string(),
            ));
        }
        if training.synthetic.anomaly_low >= training.synthetic.anomaly_high {
            return Err(ConfigError::Invalid(
                "training.synthetic.anomaly_low must be below anomaly_high".to_string(),
            ));
        }
        Ok(())
    }
}
