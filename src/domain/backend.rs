//! Secret backend records
//!
//! A secret backend is a named, configured deployment of a provider type.
//! Two names are reserved: `internal` is the controller's built-in backend
//! and `auto` is the model-config sentinel meaning "the default for this
//! model type".

use super::id::BackendId;
use crate::errors::{Result, SecretplaneError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Name of the built-in controller backend
pub const INTERNAL_BACKEND_NAME: &str = "internal";

/// Model-config value selecting the default backend for the model type
pub const AUTO_BACKEND_NAME: &str = "auto";

/// Provider type of the built-in backend
pub const CONTROLLER_BACKEND_TYPE: &str = "controller";

/// Shortest accepted token rotation interval
pub const MIN_TOKEN_ROTATE_INTERVAL: Duration = Duration::from_secs(3600);

/// Provider-specific backend configuration
pub type BackendConfig = serde_json::Map<String, serde_json::Value>;

/// A persisted secret backend instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretBackend {
    pub id: BackendId,
    pub name: String,
    pub backend_type: String,
    pub config: BackendConfig,
    #[serde(default, with = "optional_duration_secs")]
    pub token_rotate_interval: Option<Duration>,
    pub next_rotate_time: Option<DateTime<Utc>>,
}

impl SecretBackend {
    pub fn is_internal(&self) -> bool {
        self.name == INTERNAL_BACKEND_NAME
    }
}

/// Validate a user-supplied backend name.
pub fn validate_backend_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(SecretplaneError::not_valid_field("missing backend name", "name"));
    }
    if name == INTERNAL_BACKEND_NAME || name == AUTO_BACKEND_NAME {
        return Err(SecretplaneError::not_valid_field(
            format!("backend name {:?} is reserved", name),
            "name",
        ));
    }
    Ok(())
}

/// Validate a token rotation interval, if one is given.
pub fn validate_rotate_interval(interval: Option<Duration>) -> Result<()> {
    match interval {
        Some(interval) if interval < MIN_TOKEN_ROTATE_INTERVAL => {
            Err(SecretplaneError::not_valid_field(
                format!(
                    "token rotate interval {}s is less than the minimum of {}s",
                    interval.as_secs(),
                    MIN_TOKEN_ROTATE_INTERVAL.as_secs()
                ),
                "token_rotate_interval",
            ))
        }
        _ => Ok(()),
    }
}

/// When a token rotated now with `interval` is next due
pub fn next_rotate_time(interval: Option<Duration>) -> Option<DateTime<Utc>> {
    interval
        .and_then(|interval| chrono::Duration::from_std(interval).ok())
        .map(|delta| Utc::now() + delta)
}

/// Parameters for creating a backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSecretBackendParams {
    /// Generated when absent
    pub id: Option<BackendId>,
    pub name: String,
    pub backend_type: String,
    #[serde(default)]
    pub config: BackendConfig,
    #[serde(default, with = "optional_duration_secs")]
    pub token_rotate_interval: Option<Duration>,
}

/// Parameters for updating a backend
#[derive(Debug, Clone, Default)]
pub struct UpdateSecretBackendParams {
    pub id: BackendId,
    pub name_change: Option<String>,
    /// Merged over the existing configuration
    pub config: BackendConfig,
    /// `Some(None)` clears the interval
    pub token_rotate_interval: Option<Option<Duration>>,
}

impl UpdateSecretBackendParams {
    pub fn new(id: BackendId) -> Self {
        Self { id, ..Default::default() }
    }
}

/// Selection for list operations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendFilter {
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub all: bool,
}

impl BackendFilter {
    pub fn all() -> Self {
        Self { names: vec![], all: true }
    }

    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { names: names.into_iter().map(Into::into).collect(), all: false }
    }

    pub fn matches(&self, name: &str) -> bool {
        self.all || self.names.is_empty() || self.names.iter().any(|n| n == name)
    }
}

/// Health of a backend as reported by list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Active,
    Error,
}

impl BackendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Error => "error",
        }
    }
}

/// Summary returned by list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretBackendInfo {
    pub id: BackendId,
    pub name: String,
    pub backend_type: String,
    /// Sensitive keys redacted unless revealed
    pub config: BackendConfig,
    #[serde(default, with = "optional_duration_secs")]
    pub token_rotate_interval: Option<Duration>,
    pub num_secrets: i64,
    pub status: BackendStatus,
    pub message: Option<String>,
}

/// Next token rotation due for a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationChange {
    pub id: BackendId,
    pub name: String,
    pub next_trigger_time: Option<DateTime<Utc>>,
}

mod optional_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}
