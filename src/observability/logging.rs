//! # Structured Logging
//!
//! Subscriber setup and span helpers built on the tracing ecosystem.
//! Secret values never appear in fields; `SecretValue` and `SecretString`
//! render as `[REDACTED]`.

use crate::config::{AppConfig, ObservabilityConfig};
use crate::errors::{Result, SecretplaneError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured level when set.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| {
            SecretplaneError::config(format!("Invalid log level '{}': {}", config.log_level, e))
        })?;

    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json_logging {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_target(true)).try_init()
    };

    result.map_err(|e| {
        SecretplaneError::config_with_source("Failed to install tracing subscriber", Box::new(e))
    })
}

/// Create a tracing span for secret backend calls.
///
/// ```rust,ignore
/// let span = backend_span!("save_content", backend_id = %id);
/// ```
#[macro_export]
macro_rules! backend_span {
    ($operation:expr) => {
        tracing::debug_span!(
            "secret_backend_call",
            operation = %$operation,
            call_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::debug_span!(
            "secret_backend_call",
            operation = %$operation,
            call_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for one migration pass of a secret owner.
#[macro_export]
macro_rules! migration_span {
    ($model:expr, $owner:expr) => {
        tracing::info_span!(
            "secret_migration_pass",
            model_uuid = %$model,
            owner = %$owner,
            pass_id = %uuid::Uuid::new_v4()
        )
    };
}

/// Log configuration at startup
pub fn log_config_info(config: &AppConfig) {
    tracing::info!(
        controller_uuid = %config.controller.controller_uuid,
        models = config.controller.model_uuids.len(),
        database_type = "sqlite",
        call_timeout_secs = config.secret_backends.call_timeout_seconds,
        retry_backoff_secs = config.migration.retry_backoff_seconds,
        max_attempts = config.migration.max_attempts,
        metrics_enabled = %config.observability.enable_metrics,
        "Secret control plane configuration"
    );
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_macros_compile() {
        let _span = backend_span!("ping");
        let _span = backend_span!("save_content", backend_id = "vault1");
        let _span = migration_span!("model-uuid", "unit-wordpress-0");
    }
}
