//! Vault secret backend provider
//!
//! Stores revision content in a HashiCorp Vault KV v2 mount. Each revision
//! is written to `<secret-id>-<revision>` under the configured mount path.

use super::provider::{
    check_endpoint, check_known_keys, config_str, content_name, required_str, ProviderConfig,
    SecretBackendProvider, SecretsBackend,
};
use crate::domain::{BackendConfig, SecretUri};
use crate::errors::{Result, SecretplaneError};
use crate::secrets::types::SecretValue;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;
use vaultrs::kv2;

pub const VAULT_BACKEND_TYPE: &str = "vault";

pub const CONFIG_ENDPOINT: &str = "endpoint";
pub const CONFIG_TOKEN: &str = "token";
pub const CONFIG_NAMESPACE: &str = "namespace";
pub const CONFIG_MOUNT_PATH: &str = "mount-path";
pub const CONFIG_CA_CERT: &str = "ca-cert";

const DEFAULT_MOUNT_PATH: &str = "secrets";

const KNOWN_KEYS: &[&str] =
    &[CONFIG_ENDPOINT, CONFIG_TOKEN, CONFIG_NAMESPACE, CONFIG_MOUNT_PATH, CONFIG_CA_CERT];

#[derive(Debug, Default)]
pub struct VaultProvider;

impl VaultProvider {
    pub fn new() -> Self {
        Self
    }

    fn client(config: &BackendConfig, ca_cert_file: Option<PathBuf>) -> Result<VaultClient> {
        let address = required_str(config, CONFIG_ENDPOINT)?;

        let mut settings_builder = VaultClientSettingsBuilder::default();
        settings_builder.address(address);

        if let Some(token) = config_str(config, CONFIG_TOKEN) {
            settings_builder.token(token);
        }

        if let Some(namespace) = config_str(config, CONFIG_NAMESPACE) {
            settings_builder.namespace(Some(namespace.to_string()));
        }

        if let Some(path) = ca_cert_file {
            settings_builder.ca_certs(vec![path.to_string_lossy().into_owned()]);
        }

        let settings = settings_builder.build().map_err(|e| {
            SecretplaneError::not_valid(format!("Invalid vault backend configuration: {}", e))
        })?;

        VaultClient::new(settings)
            .map_err(|e| SecretplaneError::config(format!("Failed to create Vault client: {}", e)))
    }

    /// vaultrs only reads CA bundles from disk; the PEM is kept beside other
    /// temp files, one per backend.
    fn write_ca_cert(config: &ProviderConfig) -> Result<Option<PathBuf>> {
        let Some(pem) = config_str(&config.config, CONFIG_CA_CERT) else {
            return Ok(None);
        };
        let path = std::env::temp_dir().join(format!("secretplane-vault-{}.pem", config.backend_id));
        std::fs::write(&path, pem).map_err(|e| SecretplaneError::Io {
            source: e,
            context: format!("Failed to write CA certificate for backend {}", config.backend_name),
        })?;
        Ok(Some(path))
    }
}

#[async_trait]
impl SecretBackendProvider for VaultProvider {
    fn provider_type(&self) -> &'static str {
        VAULT_BACKEND_TYPE
    }

    fn config_defaults(&self) -> BackendConfig {
        let mut defaults = BackendConfig::new();
        defaults.insert(CONFIG_MOUNT_PATH.to_string(), Value::String(DEFAULT_MOUNT_PATH.into()));
        defaults
    }

    fn validate_config(&self, _old: Option<&BackendConfig>, new: &BackendConfig) -> Result<()> {
        check_known_keys(new, KNOWN_KEYS, VAULT_BACKEND_TYPE)?;
        check_endpoint(new, CONFIG_ENDPOINT)?;
        required_str(new, CONFIG_MOUNT_PATH)?;
        for key in KNOWN_KEYS {
            if let Some(value) = new.get(*key) {
                if !value.is_string() {
                    return Err(SecretplaneError::not_valid_field(
                        format!("config {:?} must be a string", key),
                        *key,
                    ));
                }
            }
        }
        if let Some(pem) = config_str(new, CONFIG_CA_CERT) {
            if !pem.contains("-----BEGIN CERTIFICATE-----") {
                return Err(SecretplaneError::not_valid_field(
                    "ca-cert must be a PEM encoded certificate",
                    CONFIG_CA_CERT,
                ));
            }
        }
        Ok(())
    }

    fn sensitive_keys(&self) -> &'static [&'static str] {
        &[CONFIG_TOKEN]
    }

    fn supports_token_refresh(&self) -> bool {
        true
    }

    async fn refresh_token(&self, config: &BackendConfig) -> Result<BackendConfig> {
        let client = Self::client(config, None)?;
        let auth = vaultrs::token::renew_self(&client, None)
            .await
            .map_err(|e| SecretplaneError::backend(VAULT_BACKEND_TYPE, format!("token renewal failed: {}", e)))?;

        let mut refreshed = config.clone();
        refreshed.insert(CONFIG_TOKEN.to_string(), Value::String(auth.client_token));
        info!(lease_duration = auth.lease_duration, "Renewed vault backend token");
        Ok(refreshed)
    }

    fn new_backend(&self, config: &ProviderConfig) -> Result<Box<dyn SecretsBackend>> {
        let ca_cert_file = Self::write_ca_cert(config)?;
        let client = Self::client(&config.config, ca_cert_file)?;
        let mount_path =
            config_str(&config.config, CONFIG_MOUNT_PATH).unwrap_or(DEFAULT_MOUNT_PATH).to_string();

        debug!(backend = %config.backend_name, mount_path = %mount_path, "Initialized vault backend client");
        Ok(Box::new(VaultBackend { name: config.backend_name.clone(), client, mount_path }))
    }
}

pub struct VaultBackend {
    name: String,
    client: VaultClient,
    mount_path: String,
}

impl std::fmt::Debug for VaultBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultBackend")
            .field("name", &self.name)
            .field("mount_path", &self.mount_path)
            .field("client", &"[VaultClient]")
            .finish()
    }
}

fn is_not_found(e: &ClientError) -> bool {
    matches!(e, ClientError::APIError { code: 404, .. })
}

impl VaultBackend {
    fn error(&self, operation: &str, e: ClientError) -> SecretplaneError {
        SecretplaneError::backend(&self.name, format!("{} failed: {}", operation, e))
    }
}

#[async_trait]
impl SecretsBackend for VaultBackend {
    async fn ping(&self) -> Result<()> {
        vaultrs::sys::health(&self.client).await.map_err(|e| self.error("health check", e))?;
        Ok(())
    }

    async fn get_content(&self, revision_id: &str) -> Result<SecretValue> {
        let data: BTreeMap<String, String> =
            kv2::read(&self.client, &self.mount_path, revision_id).await.map_err(|e| {
                if is_not_found(&e) {
                    SecretplaneError::not_found("secret content", revision_id)
                } else {
                    self.error("read", e)
                }
            })?;
        Ok(SecretValue::from_stored(data))
    }

    async fn save_content(
        &self,
        uri: &SecretUri,
        revision: i64,
        value: &SecretValue,
    ) -> Result<String> {
        let path = content_name(uri, revision);
        kv2::set(&self.client, &self.mount_path, &path, value.expose())
            .await
            .map_err(|e| self.error("write", e))?;
        debug!(backend = %self.name, path = %path, "Stored content in vault");
        Ok(path)
    }

    async fn delete_content(&self, revision_id: &str) -> Result<()> {
        match kv2::delete_metadata(&self.client, &self.mount_path, revision_id).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(self.error("delete", e)),
        }
    }
}
