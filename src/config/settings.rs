//! # Configuration Settings
//!
//! Defines the configuration structure for the secret backend control plane.

use crate::errors::{Result, SecretplaneError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Database configuration
    #[validate(nested)]
    pub database: DatabaseConfig,

    /// Controller identity and the models it coordinates
    #[validate(nested)]
    pub controller: ControllerConfig,

    /// Secret backend call and cache settings
    #[validate(nested)]
    pub secret_backends: SecretBackendsConfig,

    /// Migration coordinator settings
    #[validate(nested)]
    pub migration: MigrationConfig,

    /// Backend token rotation settings
    #[validate(nested)]
    pub rotation: RotationConfig,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from an optional file plus `SECRETPLANE_*` environment variables.
    ///
    /// Nested keys use a double underscore, e.g. `SECRETPLANE_DATABASE__URL`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("SECRETPLANE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(SecretplaneError::from)?;
        self.validate_custom()
    }

    fn validate_custom(&self) -> Result<()> {
        if !self.database.url.starts_with("sqlite://") {
            return Err(SecretplaneError::not_valid_field(
                "Database URL must start with 'sqlite://'",
                "database.url",
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(SecretplaneError::not_valid(
                "min_connections cannot be greater than max_connections",
            ));
        }

        for model in &self.controller.model_uuids {
            uuid::Uuid::parse_str(model).map_err(|e| {
                SecretplaneError::not_valid_field(
                    format!("invalid model uuid {:?}: {}", model, e),
                    "controller.model_uuids",
                )
            })?;
        }

        Ok(())
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[validate(length(min = 1, message = "Database URL cannot be empty"))]
    pub url: String,

    /// Maximum number of connections in the pool
    #[validate(range(min = 1, max = 100, message = "Max connections must be between 1 and 100"))]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[validate(range(max = 50, message = "Min connections must be at most 50"))]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[validate(range(
        min = 1,
        max = 60,
        message = "Connect timeout must be between 1 and 60 seconds"
    ))]
    pub connect_timeout_seconds: u64,

    /// Idle timeout in seconds (0 = no timeout)
    pub idle_timeout_seconds: u64,

    /// Enable automatic migrations
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/secretplane.db".to_string(),
            max_connections: 10,
            min_connections: 0,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600,
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Get idle timeout as Duration (None if 0)
    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_seconds))
        }
    }
}

/// Controller identity
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ControllerConfig {
    /// Controller UUID; doubles as the id of the internal backend
    #[validate(length(min = 1, message = "Controller UUID cannot be empty"))]
    pub controller_uuid: String,

    /// Models whose secret migration is coordinated by this process
    pub model_uuids: Vec<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self { controller_uuid: uuid::Uuid::nil().to_string(), model_uuids: vec![] }
    }
}

/// Secret backend call and cache settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SecretBackendsConfig {
    /// Upper bound on any single provider call (ping/get/save/delete)
    #[validate(range(
        min = 1,
        max = 600,
        message = "Call timeout must be between 1 and 600 seconds"
    ))]
    pub call_timeout_seconds: u64,

    /// How long admin backend configuration stays cached per model
    #[validate(range(max = 86400, message = "Cache TTL must be at most 24 hours"))]
    pub cache_ttl_seconds: u64,

    /// Delete content still held in a backend when it is force-removed
    pub purge_on_forced_delete: bool,
}

impl Default for SecretBackendsConfig {
    fn default() -> Self {
        Self { call_timeout_seconds: 30, cache_ttl_seconds: 300, purge_on_forced_delete: false }
    }
}

impl SecretBackendsConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

/// Migration coordinator settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MigrationConfig {
    /// Delay between a failure burst and the single retry attempt
    #[validate(range(
        min = 1,
        max = 3600,
        message = "Retry backoff must be between 1 and 3600 seconds"
    ))]
    pub retry_backoff_seconds: u64,

    /// Failed tasks are rescheduled until they have been attempted this many times
    #[validate(range(min = 1, max = 100, message = "Max attempts must be between 1 and 100"))]
    pub max_attempts: u32,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self { retry_backoff_seconds: 5, max_attempts: 5 }
    }
}

impl MigrationConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_seconds)
    }
}

/// Backend token rotation settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RotationConfig {
    /// Delay before retrying a failed token rotation
    #[validate(range(
        min = 1,
        max = 86400,
        message = "Retry delay must be between 1 second and 24 hours"
    ))]
    pub retry_delay_seconds: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self { retry_delay_seconds: 60 }
    }
}

impl RotationConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }
}

/// Observability configuration for logging and metrics
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Metrics server port (0 = disabled)
    pub metrics_port: u16,

    /// Service name attached to log output
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            metrics_port: 9090,
            service_name: "secretplane".to_string(),
            log_level: "info".to_string(),
            json_logging: false,
        }
    }
}

impl ObservabilityConfig {
    /// Get metrics bind address (None if disabled)
    pub fn metrics_bind_address(&self) -> Option<String> {
        if self.metrics_port == 0 {
            None
        } else {
            Some(format!("0.0.0.0:{}", self.metrics_port))
        }
    }
}
