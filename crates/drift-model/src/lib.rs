//! drift-model — the scoring model behind driftwatch.
//!
//! # Architecture
//!
//! ```text
//! AnomalyModel
//!   ├── RwLock<ModelState>   Unloaded | Loaded(Arc<IsolationForest>)
//!   ├── load(path)           artifact → forest, atomic swap
//!   ├── ensure_loaded(path)  double-checked, one loader at a time
//!   └── predict(vectors)     lock-free scoring on a cloned Arc
//!
//! IsolationForest
//!   ├── fit(data, params, rng)
//!   ├── score_samples / decision_function / is_outlier
//!   └── serialized inside a ModelArtifact (JSON)
//!
//! train
//!   └── train_and_save(settings) → model artifact + metadata.json
//! ```

pub mod artifact;
pub mod error;
pub mod forest;
pub mod model;
pub mod train;

pub use artifact::ModelArtifact;
pub use error::ModelError;
pub use forest::IsolationForest;
pub use model::AnomalyModel;
pub use train::{TrainReport, train_and_save};
