//! Secret backend provider contracts
//!
//! A provider is the implementation of one backend type. A configured
//! backend instance is obtained from the provider with [`SecretBackendProvider::new_backend`]
//! and exposes content operations keyed by the provider's own revision id.

use crate::domain::{BackendConfig, BackendId, SecretUri};
use crate::errors::{Result, SecretplaneError};
use crate::secrets::types::SecretValue;
use async_trait::async_trait;
use std::fmt;

/// Everything a provider needs to build a client for one backend instance
#[derive(Clone, PartialEq)]
pub struct ProviderConfig {
    pub backend_id: BackendId,
    pub backend_name: String,
    pub backend_type: String,
    pub config: BackendConfig,
}

impl ProviderConfig {
    pub fn new(
        backend_id: BackendId,
        backend_name: impl Into<String>,
        backend_type: impl Into<String>,
        config: BackendConfig,
    ) -> Self {
        Self {
            backend_id,
            backend_name: backend_name.into(),
            backend_type: backend_type.into(),
            config,
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Values may carry tokens; keys only.
        f.debug_struct("ProviderConfig")
            .field("backend_id", &self.backend_id)
            .field("backend_name", &self.backend_name)
            .field("backend_type", &self.backend_type)
            .field("config_keys", &self.config.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A configured backend instance
#[async_trait]
pub trait SecretsBackend: Send + Sync + fmt::Debug {
    /// Check the backend is reachable with the configured credentials
    async fn ping(&self) -> Result<()>;

    /// Read the content stored under `revision_id`
    async fn get_content(&self, revision_id: &str) -> Result<SecretValue>;

    /// Store content for a secret revision, returning the backend's revision id
    async fn save_content(
        &self,
        uri: &SecretUri,
        revision: i64,
        value: &SecretValue,
    ) -> Result<String>;

    /// Remove content. Content that is already gone is not an error.
    async fn delete_content(&self, revision_id: &str) -> Result<()>;
}

/// Implementation of one backend type
#[async_trait]
pub trait SecretBackendProvider: Send + Sync {
    /// Type name used in backend records
    fn provider_type(&self) -> &'static str;

    /// Defaults merged under user-supplied configuration
    fn config_defaults(&self) -> BackendConfig {
        BackendConfig::new()
    }

    /// Validate a new configuration, with the previous one on update
    fn validate_config(&self, _old: Option<&BackendConfig>, _new: &BackendConfig) -> Result<()> {
        Ok(())
    }

    /// Configuration keys whose values are redacted in listings
    fn sensitive_keys(&self) -> &'static [&'static str] {
        &[]
    }

    fn supports_token_refresh(&self) -> bool {
        false
    }

    /// Obtain a fresh credential, returning the configuration to persist
    async fn refresh_token(&self, _config: &BackendConfig) -> Result<BackendConfig> {
        Err(SecretplaneError::not_supported(format!(
            "token refresh for {:?} backends",
            self.provider_type()
        )))
    }

    /// Build a client for a configured backend instance
    fn new_backend(&self, config: &ProviderConfig) -> Result<Box<dyn SecretsBackend>>;
}

/// String value of a config key, if present and non-empty
pub fn config_str<'a>(config: &'a BackendConfig, key: &str) -> Option<&'a str> {
    config.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

/// String value of a required config key
pub fn required_str<'a>(config: &'a BackendConfig, key: &str) -> Result<&'a str> {
    config_str(config, key).ok_or_else(|| {
        SecretplaneError::not_valid_field(format!("missing required config {:?}", key), key)
    })
}

/// Reject keys outside `known`
pub fn check_known_keys(config: &BackendConfig, known: &[&str], provider: &str) -> Result<()> {
    let mut unknown: Vec<&str> =
        config.keys().map(String::as_str).filter(|k| !known.contains(k)).collect();
    if unknown.is_empty() {
        return Ok(());
    }
    unknown.sort_unstable();
    Err(SecretplaneError::not_valid(format!(
        "unknown config for {:?} backend: {}",
        provider,
        unknown.join(", ")
    )))
}

/// Validate that a config value is an http(s) URL
pub fn check_endpoint(config: &BackendConfig, key: &str) -> Result<url::Url> {
    let raw = required_str(config, key)?;
    let parsed = url::Url::parse(raw).map_err(|e| {
        SecretplaneError::not_valid_field(format!("invalid {} {:?}: {}", key, raw, e), key)
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(SecretplaneError::not_valid_field(
            format!("{} scheme {:?} not valid, expected http or https", key, scheme),
            key,
        )),
    }
}

/// Name under which external providers store a revision's content
pub fn content_name(uri: &SecretUri, revision: i64) -> String {
    format!("{}-{}", uri.id(), revision)
}
