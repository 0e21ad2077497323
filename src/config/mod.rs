//! # Configuration Management
//!
//! Layered configuration for the secret backend control plane: defaults,
//! then an optional YAML/TOML file, then `SECRETPLANE_*` environment variables.

pub mod settings;

pub use settings::{
    AppConfig, ControllerConfig, DatabaseConfig, MigrationConfig, ObservabilityConfig,
    RotationConfig, SecretBackendsConfig,
};
