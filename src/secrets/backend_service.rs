//! Secret backend registry service
//!
//! CRUD, health and token rotation over backend instances. Every mutation
//! invalidates the content router's cached configuration and republishes
//! the backend's rotation schedule when its rotation fields change.

use super::providers::{ProviderConfig, ProviderRegistry, SecretBackendProvider};
use super::router::{bounded_call, ContentRouter};
use crate::config::SecretBackendsConfig;
use crate::domain::{
    next_rotate_time, validate_backend_name, validate_rotate_interval, BackendConfig,
    BackendFilter, BackendId, BackendStatus, CreateSecretBackendParams, RotationChange,
    SecretBackend, SecretBackendInfo, UpdateSecretBackendParams, CONTROLLER_BACKEND_TYPE,
    INTERNAL_BACKEND_NAME,
};
use crate::errors::{Result, SecretplaneError};
use crate::observability::MetricsRecorder;
use crate::runtime::Notifier;
use crate::secrets::types::REDACTED;
use crate::storage::{ModelRepository, SecretBackendRepository, SecretRepository};
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub struct SecretBackendService {
    backends: Arc<dyn SecretBackendRepository>,
    secrets: Arc<dyn SecretRepository>,
    models: Arc<dyn ModelRepository>,
    registry: Arc<ProviderRegistry>,
    router: Arc<ContentRouter>,
    notifier: Notifier,
    purge_on_forced_delete: bool,
    call_timeout: Duration,
    metrics: MetricsRecorder,
}

impl std::fmt::Debug for SecretBackendService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBackendService")
            .field("registry", &self.registry)
            .field("purge_on_forced_delete", &self.purge_on_forced_delete)
            .finish()
    }
}

/// Provider defaults overlaid with the supplied configuration
fn merge_config(defaults: BackendConfig, supplied: &BackendConfig) -> BackendConfig {
    let mut merged = defaults;
    for (key, value) in supplied {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Replace the values of `sensitive` keys with the redaction marker
pub fn redact_config(config: &BackendConfig, sensitive: &[&str]) -> BackendConfig {
    config
        .iter()
        .map(|(key, value)| {
            if sensitive.contains(&key.as_str()) {
                (key.clone(), Value::String(REDACTED.to_string()))
            } else {
                (key.clone(), value.clone())
            }
        })
        .collect()
}

fn rotation_change(backend: &SecretBackend) -> RotationChange {
    RotationChange {
        id: backend.id.clone(),
        name: backend.name.clone(),
        next_trigger_time: backend.next_rotate_time,
    }
}

impl SecretBackendService {
    pub fn new(
        backends: Arc<dyn SecretBackendRepository>,
        secrets: Arc<dyn SecretRepository>,
        models: Arc<dyn ModelRepository>,
        registry: Arc<ProviderRegistry>,
        router: Arc<ContentRouter>,
        notifier: Notifier,
        settings: &SecretBackendsConfig,
    ) -> Self {
        Self {
            backends,
            secrets,
            models,
            registry,
            router,
            notifier,
            purge_on_forced_delete: settings.purge_on_forced_delete,
            call_timeout: settings.call_timeout(),
            metrics: MetricsRecorder::new(),
        }
    }

    /// `Conflict` while any model's config names the backend
    async fn ensure_not_named_by_models(&self, name: &str) -> Result<()> {
        let models = self.models.list_using_backend(name).await?;
        if models.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
        Err(SecretplaneError::conflict(
            format!("secret backend {:?} is in use by models: {}", name, names.join(", ")),
            "secret backend",
        ))
    }

    async fn ping(
        &self,
        provider: &Arc<dyn SecretBackendProvider>,
        backend: &SecretBackend,
    ) -> Result<()> {
        let config = ProviderConfig::new(
            backend.id.clone(),
            backend.name.clone(),
            backend.backend_type.clone(),
            backend.config.clone(),
        );
        let client = provider.new_backend(&config)?;
        bounded_call("ping", &backend.name, self.call_timeout, client.ping()).await.map_err(|e| {
            match e {
                SecretplaneError::Backend { .. } | SecretplaneError::Timeout { .. } => e,
                other => SecretplaneError::backend(&backend.name, format!("ping failed: {}", other)),
            }
        })
    }

    fn check_rotation_support(
        provider: &Arc<dyn SecretBackendProvider>,
        interval: Option<Duration>,
    ) -> Result<()> {
        if interval.is_some() && !provider.supports_token_refresh() {
            return Err(SecretplaneError::not_supported(format!(
                "token refresh on secret backend type {:?}",
                provider.provider_type()
            )));
        }
        validate_rotate_interval(interval)
    }

    fn publish_rotation(&self, backend: &SecretBackend) {
        self.notifier.backend_rotation.publish(&(), rotation_change(backend));
    }

    pub async fn get_secret_backend(&self, id: &BackendId) -> Result<SecretBackend> {
        self.backends
            .get(id)
            .await?
            .ok_or_else(|| SecretplaneError::not_found("secret backend", id.as_str()))
    }

    pub async fn get_secret_backend_by_name(&self, name: &str) -> Result<SecretBackend> {
        self.backends
            .get_by_name(name)
            .await?
            .ok_or_else(|| SecretplaneError::not_found("secret backend", name))
    }

    /// Create the controller's built-in backend if it does not exist yet
    #[instrument(skip(self), name = "ensure_internal_backend")]
    pub async fn ensure_internal_backend(&self, controller_uuid: &str) -> Result<SecretBackend> {
        if let Some(existing) = self.backends.get_by_name(INTERNAL_BACKEND_NAME).await? {
            return Ok(existing);
        }
        let backend = SecretBackend {
            id: BackendId::from(controller_uuid),
            name: INTERNAL_BACKEND_NAME.to_string(),
            backend_type: CONTROLLER_BACKEND_TYPE.to_string(),
            config: BackendConfig::new(),
            token_rotate_interval: None,
            next_rotate_time: None,
        };
        match self.backends.create(&backend).await {
            Ok(created) => {
                info!(backend_id = %created.id, "Created internal secret backend");
                self.router.invalidate_all();
                Ok(created)
            }
            // Lost a race with another bootstrap.
            Err(SecretplaneError::AlreadyExists { .. }) => {
                self.get_secret_backend_by_name(INTERNAL_BACKEND_NAME).await
            }
            Err(e) => Err(e),
        }
    }

    /// Register a new backend. Unless `force`, the backend must answer a ping.
    #[instrument(skip(self, params), fields(name = %params.name, backend_type = %params.backend_type), name = "create_secret_backend")]
    pub async fn create_secret_backend(
        &self,
        params: CreateSecretBackendParams,
        force: bool,
    ) -> Result<SecretBackend> {
        validate_backend_name(&params.name)?;
        if params.backend_type == CONTROLLER_BACKEND_TYPE {
            return Err(SecretplaneError::not_valid_field(
                format!("backend type {:?} is reserved for the internal backend", CONTROLLER_BACKEND_TYPE),
                "backend_type",
            ));
        }
        let provider = self.registry.provider(&params.backend_type)?;
        Self::check_rotation_support(&provider, params.token_rotate_interval)?;

        let config = merge_config(provider.config_defaults(), &params.config);
        provider.validate_config(None, &config)?;

        let backend = SecretBackend {
            id: params.id.unwrap_or_default(),
            name: params.name,
            backend_type: params.backend_type,
            config,
            token_rotate_interval: params.token_rotate_interval,
            next_rotate_time: next_rotate_time(params.token_rotate_interval),
        };

        if !force {
            self.ping(&provider, &backend).await?;
        }

        let created = self.backends.create(&backend).await?;
        self.router.invalidate_all();
        if created.token_rotate_interval.is_some() {
            self.publish_rotation(&created);
        }

        info!(backend_id = %created.id, name = %created.name, "Created secret backend");
        Ok(created)
    }

    /// Update a backend. Supplied config is merged over the existing config;
    /// each of `reset_keys` reverts to the provider default or is removed.
    #[instrument(skip(self, params, reset_keys), fields(backend_id = %params.id), name = "update_secret_backend")]
    pub async fn update_secret_backend(
        &self,
        params: UpdateSecretBackendParams,
        force: bool,
        reset_keys: &[String],
    ) -> Result<SecretBackend> {
        let existing = self.get_secret_backend(&params.id).await?;
        if existing.is_internal() {
            return Err(SecretplaneError::not_valid("cannot update the internal secret backend"));
        }
        let provider = self.registry.provider(&existing.backend_type)?;
        let defaults = provider.config_defaults();

        let mut updated = existing.clone();
        if let Some(name) = params.name_change {
            validate_backend_name(&name)?;
            if name != existing.name {
                self.ensure_not_named_by_models(&existing.name).await?;
            }
            updated.name = name;
        }

        let mut config = merge_config(existing.config.clone(), &params.config);
        for key in reset_keys {
            if params.config.contains_key(key) {
                return Err(SecretplaneError::not_valid_field(
                    format!("config {:?} cannot be both set and reset", key),
                    key.as_str(),
                ));
            }
            match defaults.get(key) {
                Some(default) => {
                    config.insert(key.clone(), default.clone());
                }
                None if existing.config.contains_key(key) => {
                    config.remove(key);
                }
                None => {
                    return Err(SecretplaneError::not_valid_field(
                        format!("cannot reset unknown config {:?}", key),
                        key.as_str(),
                    ))
                }
            }
        }
        provider.validate_config(Some(&existing.config), &config)?;
        updated.config = config;

        if let Some(interval) = params.token_rotate_interval {
            Self::check_rotation_support(&provider, interval)?;
            updated.token_rotate_interval = interval;
            updated.next_rotate_time = next_rotate_time(interval);
        }

        if !force {
            self.ping(&provider, &updated).await?;
        }

        let saved = self.backends.update(&updated).await?;
        self.router.invalidate_all();
        if saved.token_rotate_interval != existing.token_rotate_interval
            || saved.name != existing.name
        {
            self.publish_rotation(&saved);
        }

        info!(backend_id = %saved.id, name = %saved.name, "Updated secret backend");
        Ok(saved)
    }

    /// Delete a backend. Without `force`, a backend still referenced by any
    /// revision is a `Conflict`.
    #[instrument(skip(self), fields(backend_id = %id), name = "delete_secret_backend")]
    pub async fn delete_secret_backend(&self, id: &BackendId, force: bool) -> Result<()> {
        let backend = self.get_secret_backend(id).await?;
        if backend.is_internal() {
            return Err(SecretplaneError::not_valid("cannot delete the internal secret backend"));
        }

        if force && self.purge_on_forced_delete {
            self.purge_content(&backend).await?;
        }

        let deleted = self.backends.delete(id, force).await?;
        self.router.invalidate_all();
        if deleted.backend.token_rotate_interval.is_some() {
            self.notifier.backend_rotation.publish(
                &(),
                RotationChange { next_trigger_time: None, ..rotation_change(&deleted.backend) },
            );
        }

        if deleted.references > 0 {
            warn!(
                backend_id = %id,
                references = deleted.references,
                "Force-deleted secret backend still referenced by revisions"
            );
        }
        info!(backend_id = %id, name = %deleted.backend.name, "Deleted secret backend");
        Ok(())
    }

    /// Best-effort removal of content still held by a backend about to be
    /// force-deleted. Failures are logged.
    async fn purge_content(&self, backend: &SecretBackend) -> Result<()> {
        let references = self.secrets.list_backend_references(&backend.id).await?;
        if references.is_empty() {
            return Ok(());
        }
        let provider = match self.registry.provider(&backend.backend_type) {
            Ok(provider) => provider,
            Err(e) => {
                warn!(backend = %backend.name, error = %e, "Cannot purge content of secret backend");
                return Ok(());
            }
        };
        let config = ProviderConfig::new(
            backend.id.clone(),
            backend.name.clone(),
            backend.backend_type.clone(),
            backend.config.clone(),
        );
        let client = match provider.new_backend(&config) {
            Ok(client) => client,
            Err(e) => {
                warn!(backend = %backend.name, error = %e, "Cannot purge content of secret backend");
                return Ok(());
            }
        };

        let mut purged = 0;
        for reference in &references {
            let call = client.delete_content(&reference.value_ref.revision_id);
            match bounded_call("delete_content", &backend.name, self.call_timeout, call).await {
                Ok(()) => purged += 1,
                Err(e) => warn!(
                    backend = %backend.name,
                    uri = %reference.uri,
                    revision = reference.revision,
                    error = %e,
                    "Failed to purge secret content"
                ),
            }
        }
        info!(backend = %backend.name, purged, total = references.len(), "Purged secret backend content");
        Ok(())
    }

    async fn describe(
        &self,
        backend: SecretBackend,
        counts: &HashMap<BackendId, i64>,
        reveal: bool,
    ) -> SecretBackendInfo {
        let provider = self.registry.provider(&backend.backend_type);
        let (status, message) = match &provider {
            Ok(provider) => match self.ping(provider, &backend).await {
                Ok(()) => (BackendStatus::Active, None),
                Err(e) => (BackendStatus::Error, Some(e.to_string())),
            },
            Err(e) => (BackendStatus::Error, Some(e.to_string())),
        };
        let config = match (&provider, reveal) {
            (_, true) => backend.config.clone(),
            (Ok(provider), false) => redact_config(&backend.config, provider.sensitive_keys()),
            (Err(_), false) => {
                let all: Vec<&str> = backend.config.keys().map(String::as_str).collect();
                redact_config(&backend.config, &all)
            }
        };

        SecretBackendInfo {
            num_secrets: counts.get(&backend.id).copied().unwrap_or(0),
            id: backend.id,
            name: backend.name,
            backend_type: backend.backend_type,
            config,
            token_rotate_interval: backend.token_rotate_interval,
            status,
            message,
        }
    }

    /// Summaries of the backends matching `filter`, pinged concurrently for status.
    /// Sensitive config is redacted unless `reveal`.
    #[instrument(skip(self, filter), name = "list_secret_backends")]
    pub async fn list_secret_backends(
        &self,
        filter: &BackendFilter,
        reveal: bool,
    ) -> Result<Vec<SecretBackendInfo>> {
        let counts = self.backends.count_all_references().await?;
        let selected: Vec<SecretBackend> = self
            .backends
            .list()
            .await?
            .into_iter()
            .filter(|backend| filter.matches(&backend.name))
            .collect();

        let described = selected.into_iter().map(|backend| self.describe(backend, &counts, reveal));
        Ok(join_all(described).await)
    }

    /// Refresh a backend's credential through its provider and schedule
    /// the next rotation.
    #[instrument(skip(self), fields(backend_id = %id), name = "rotate_backend_token")]
    pub async fn rotate_backend_token(&self, id: &BackendId) -> Result<SecretBackend> {
        let backend = self.get_secret_backend(id).await?;
        let provider = self.registry.provider(&backend.backend_type)?;
        if !provider.supports_token_refresh() {
            return Err(SecretplaneError::not_supported(format!(
                "token refresh on secret backend type {:?}",
                backend.backend_type
            )));
        }

        let refreshed = bounded_call(
            "refresh_token",
            &backend.name,
            self.call_timeout,
            provider.refresh_token(&backend.config),
        )
        .await;
        self.metrics.record_token_rotation(refreshed.is_ok());

        let mut updated = backend;
        updated.config = refreshed?;
        updated.next_rotate_time = next_rotate_time(updated.token_rotate_interval);

        let saved = self.backends.update(&updated).await?;
        self.router.invalidate_all();
        self.publish_rotation(&saved);

        info!(backend_id = %saved.id, next_rotate_time = ?saved.next_rotate_time, "Rotated secret backend token");
        Ok(saved)
    }

    /// Current rotation schedule of every backend with an interval
    pub async fn rotation_schedule(&self) -> Result<Vec<RotationChange>> {
        self.backends.rotation_schedule().await
    }
}
