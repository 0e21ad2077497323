//! Backend content router
//!
//! Resolves a model's backend configuration (the active backend plus admin
//! config for every backend a revision may reference) and routes content
//! calls to the backend named by a [`ValueRef`].
//!
//! Moving content is write-before-delete: [`ContentRouter::move_content`]
//! only reads the source and writes the target. The caller switches the
//! revision's reference and only then deletes the source copy.

use super::providers::{ProviderConfig, ProviderRegistry, SecretsBackend, KUBERNETES_BACKEND_TYPE};
use crate::config::SecretBackendsConfig;
use crate::domain::{
    BackendConfig, BackendId, CloudSpec, Model, ModelType, SecretUri, ValueRef, AUTO_BACKEND_NAME,
    INTERNAL_BACKEND_NAME,
};
use crate::errors::{Result, SecretplaneError};
use crate::observability::MetricsRecorder;
use crate::runtime::{Notifier, Watcher};
use crate::secrets::types::SecretValue;
use crate::storage::{ModelRepository, SecretBackendRepository};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn, Instrument};

/// Resolves a model's cloud endpoint and credential
#[async_trait]
pub trait CloudCredentialService: Send + Sync {
    async fn cloud_spec(&self, model: &Model) -> Result<CloudSpec>;
}

/// Credential service for controllers without container models
#[derive(Debug, Default)]
pub struct NoCloudCredentials;

#[async_trait]
impl CloudCredentialService for NoCloudCredentials {
    async fn cloud_spec(&self, model: &Model) -> Result<CloudSpec> {
        Err(SecretplaneError::not_supported(format!(
            "cloud credentials for model {:?}",
            model.name
        )))
    }
}

/// Backend configuration resolved for one model
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfigInfo {
    pub active_id: BackendId,
    pub configs: HashMap<BackendId, ProviderConfig>,
}

impl BackendConfigInfo {
    pub fn config(&self, id: &BackendId) -> Result<&ProviderConfig> {
        self.configs.get(id).ok_or_else(|| SecretplaneError::not_found("secret backend", id.as_str()))
    }

    pub fn active(&self) -> Result<&ProviderConfig> {
        self.config(&self.active_id)
    }
}

struct CachedInfo {
    info: Arc<BackendConfigInfo>,
    inserted_at: Instant,
    /// Model config changes published since `info` was resolved
    changes: Watcher<String, ()>,
}

/// Run a provider call under the configured deadline, recording its outcome.
pub(crate) async fn bounded_call<T, F>(
    operation: &'static str,
    backend: &str,
    limit: Duration,
    call: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let span = crate::backend_span!(operation, backend = %backend);
    let result = match tokio::time::timeout(limit, call).instrument(span).await {
        Ok(result) => result,
        Err(_) => Err(SecretplaneError::timeout(
            format!("{} on secret backend {}", operation, backend),
            limit.as_millis() as u64,
        )),
    };
    MetricsRecorder::new().record_backend_call(
        operation,
        result.is_ok(),
        started.elapsed().as_secs_f64(),
    );
    result
}

pub struct ContentRouter {
    backends: Arc<dyn SecretBackendRepository>,
    models: Arc<dyn ModelRepository>,
    registry: Arc<ProviderRegistry>,
    clouds: Arc<dyn CloudCredentialService>,
    notifier: Notifier,
    call_timeout: Duration,
    cache_ttl: Duration,
    info_cache: DashMap<String, CachedInfo>,
    clients: DashMap<BackendId, (ProviderConfig, Arc<dyn SecretsBackend>)>,
}

impl std::fmt::Debug for ContentRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentRouter")
            .field("registry", &self.registry)
            .field("call_timeout", &self.call_timeout)
            .field("cache_ttl", &self.cache_ttl)
            .field("cached_models", &self.info_cache.len())
            .finish()
    }
}

impl ContentRouter {
    pub fn new(
        backends: Arc<dyn SecretBackendRepository>,
        models: Arc<dyn ModelRepository>,
        registry: Arc<ProviderRegistry>,
        clouds: Arc<dyn CloudCredentialService>,
        notifier: Notifier,
        settings: &SecretBackendsConfig,
    ) -> Self {
        Self {
            backends,
            models,
            registry,
            clouds,
            notifier,
            call_timeout: settings.call_timeout(),
            cache_ttl: settings.cache_ttl(),
            info_cache: DashMap::new(),
            clients: DashMap::new(),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Cached backend configuration for a model. A model config change
    /// since the entry was resolved forces a refresh regardless of its age.
    pub async fn backend_config_info(&self, model_uuid: &str) -> Result<Arc<BackendConfigInfo>> {
        if let Some(mut entry) = self.info_cache.get_mut(model_uuid) {
            let changed = !entry.changes.drain_pending().is_empty();
            if changed {
                debug!(model_uuid, "Model config changed, refreshing backend config");
            } else if entry.inserted_at.elapsed() < self.cache_ttl {
                return Ok(entry.info.clone());
            }
        }
        self.refresh_backend_config_info(model_uuid).await
    }

    /// Recompute a model's backend configuration, replacing the cached copy
    #[instrument(skip(self), name = "refresh_backend_config_info")]
    pub async fn refresh_backend_config_info(
        &self,
        model_uuid: &str,
    ) -> Result<Arc<BackendConfigInfo>> {
        // Subscribe first so a change racing the lookup is not lost
        let changes = self.notifier.model_config.subscribe(model_uuid.to_string());
        let info = Arc::new(self.compute_config_info(model_uuid).await?);
        debug!(active_id = %info.active_id, backends = info.configs.len(), "Resolved backend config");
        self.info_cache.insert(
            model_uuid.to_string(),
            CachedInfo { info: info.clone(), inserted_at: Instant::now(), changes },
        );
        Ok(info)
    }

    /// Drop one model's cached configuration
    pub fn invalidate(&self, model_uuid: &str) {
        self.info_cache.remove(model_uuid);
    }

    /// Drop every cached configuration and client
    pub fn invalidate_all(&self) {
        debug!(models = self.info_cache.len(), "Invalidating backend config cache");
        self.info_cache.clear();
        self.clients.clear();
    }

    async fn compute_config_info(&self, model_uuid: &str) -> Result<BackendConfigInfo> {
        let model = self
            .models
            .get(model_uuid)
            .await?
            .ok_or_else(|| SecretplaneError::not_found("model", model_uuid))?;

        let mut configs = HashMap::new();
        let mut internal_id = None;
        let mut by_name = HashMap::new();
        for backend in self.backends.list().await? {
            if backend.is_internal() {
                internal_id = Some(backend.id.clone());
            }
            by_name.insert(backend.name.clone(), backend.id.clone());
            configs.insert(
                backend.id.clone(),
                ProviderConfig::new(backend.id, backend.name, backend.backend_type, backend.config),
            );
        }

        let local = if model.model_type == ModelType::Caas {
            match self.local_backend_config(&model).await {
                Ok(local) => Some(local),
                Err(e) if model.secret_backend == AUTO_BACKEND_NAME => return Err(e),
                Err(e) => {
                    warn!(model = %model.name, error = %e, "Model backend unavailable");
                    None
                }
            }
        } else {
            None
        };

        let internal = || {
            internal_id
                .clone()
                .ok_or_else(|| SecretplaneError::not_found("secret backend", INTERNAL_BACKEND_NAME))
        };
        let active_id = match (model.secret_backend.as_str(), &local) {
            (AUTO_BACKEND_NAME, Some(local)) => local.backend_id.clone(),
            (AUTO_BACKEND_NAME, None) | (INTERNAL_BACKEND_NAME, _) => internal()?,
            (name, _) => by_name
                .get(name)
                .cloned()
                .ok_or_else(|| SecretplaneError::not_found("secret backend", name))?,
        };

        if let Some(local) = local {
            configs.insert(local.backend_id.clone(), local);
        }
        Ok(BackendConfigInfo { active_id, configs })
    }

    /// Admin configuration of a container model's own kubernetes backend
    async fn local_backend_config(&self, model: &Model) -> Result<ProviderConfig> {
        let spec = self.clouds.cloud_spec(model).await?;
        if spec.cloud_type != KUBERNETES_BACKEND_TYPE {
            return Err(SecretplaneError::not_supported(format!(
                "model backend for cloud type {:?}",
                spec.cloud_type
            )));
        }

        let mut config = BackendConfig::new();
        config.insert("endpoint".into(), Value::String(spec.endpoint));
        let namespace = if spec.namespace.is_empty() { model.name.clone() } else { spec.namespace };
        config.insert("namespace".into(), Value::String(namespace));
        if !spec.ca_certificates.is_empty() {
            config.insert(
                "ca-certs".into(),
                Value::Array(spec.ca_certificates.into_iter().map(Value::String).collect()),
            );
        }
        if let Some(token) = spec.token {
            config.insert("token".into(), Value::String(token.expose_secret().to_string()));
        }

        Ok(ProviderConfig::new(
            BackendId::from(model.uuid.as_str()),
            model.local_backend_name(),
            KUBERNETES_BACKEND_TYPE,
            config,
        ))
    }

    /// Client for a backend, reused while its configuration is unchanged
    pub fn client(&self, config: &ProviderConfig) -> Result<Arc<dyn SecretsBackend>> {
        if let Some(entry) = self.clients.get(&config.backend_id) {
            if entry.0 == *config {
                return Ok(entry.1.clone());
            }
        }
        let provider = self.registry.provider(&config.backend_type)?;
        let client: Arc<dyn SecretsBackend> = Arc::from(provider.new_backend(config)?);
        self.clients.insert(config.backend_id.clone(), (config.clone(), client.clone()));
        Ok(client)
    }

    /// Read content through a resolved configuration
    pub async fn get_content_with(
        &self,
        info: &BackendConfigInfo,
        value_ref: &ValueRef,
    ) -> Result<SecretValue> {
        let config = info.config(&value_ref.backend_id)?;
        let client = self.client(config)?;
        bounded_call(
            "get_content",
            &config.backend_name,
            self.call_timeout,
            client.get_content(&value_ref.revision_id),
        )
        .await
    }

    /// Write content to the active backend through a resolved configuration
    pub async fn save_content_with(
        &self,
        info: &BackendConfigInfo,
        uri: &SecretUri,
        revision: i64,
        value: &SecretValue,
    ) -> Result<ValueRef> {
        value.validate()?;
        let config = info.active()?;
        let client = self.client(config)?;
        let revision_id = bounded_call(
            "save_content",
            &config.backend_name,
            self.call_timeout,
            client.save_content(uri, revision, value),
        )
        .await?;
        Ok(ValueRef::new(config.backend_id.clone(), revision_id))
    }

    /// Delete content through a resolved configuration
    pub async fn delete_content_with(
        &self,
        info: &BackendConfigInfo,
        value_ref: &ValueRef,
    ) -> Result<()> {
        let config = info.config(&value_ref.backend_id)?;
        let client = self.client(config)?;
        bounded_call(
            "delete_content",
            &config.backend_name,
            self.call_timeout,
            client.delete_content(&value_ref.revision_id),
        )
        .await
    }

    /// Read content referenced by a revision of a model's secret
    pub async fn get_content(&self, model_uuid: &str, value_ref: &ValueRef) -> Result<SecretValue> {
        let info = self.backend_config_info(model_uuid).await?;
        self.get_content_with(&info, value_ref).await
    }

    /// Write a revision's content to the model's active backend
    pub async fn save_content(
        &self,
        model_uuid: &str,
        uri: &SecretUri,
        revision: i64,
        value: &SecretValue,
    ) -> Result<ValueRef> {
        let info = self.backend_config_info(model_uuid).await?;
        self.save_content_with(&info, uri, revision, value).await
    }

    pub async fn delete_content(&self, model_uuid: &str, value_ref: &ValueRef) -> Result<()> {
        let info = self.backend_config_info(model_uuid).await?;
        self.delete_content_with(&info, value_ref).await
    }

    /// Copy a revision's content from `from` into the active backend and
    /// return the new reference. The source copy is left in place.
    #[instrument(skip(self, info, uri, from), fields(uri = %uri, from = %from, to = %info.active_id), name = "move_secret_content")]
    pub async fn move_content(
        &self,
        info: &BackendConfigInfo,
        uri: &SecretUri,
        revision: i64,
        from: &ValueRef,
    ) -> Result<ValueRef> {
        if from.backend_id == info.active_id {
            return Ok(from.clone());
        }
        let value = self.get_content_with(info, from).await?;
        value.validate().map_err(|e| {
            SecretplaneError::not_valid(format!(
                "content of {} revision {} in backend {}: {}",
                uri, revision, from.backend_id, e
            ))
        })?;
        let to = self.save_content_with(info, uri, revision, &value).await?;
        info!(uri = %uri, revision, to = %to, "Copied secret content to active backend");
        Ok(to)
    }
}
