//! drift-core — shared types for the driftwatch scoring service.
//!
//! Holds the settings schema (`settings.toml`), the feature-vector and
//! prediction types that flow through the serving pipeline, and the
//! data-quality gate that every inbound vector passes before it reaches
//! the model.

pub mod config;
pub mod error;
pub mod quality;
pub mod types;

pub use config::Settings;
pub use error::{ConfigError, ValidationError, ValidationKind};
pub use types::*;
