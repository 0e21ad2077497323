//! Controller backend
//!
//! Stores revision content in the controller database. Every model can use
//! it; it takes no configuration.

use super::provider::{check_known_keys, ProviderConfig, SecretBackendProvider, SecretsBackend};
use crate::domain::{BackendConfig, BackendId, SecretUri, CONTROLLER_BACKEND_TYPE};
use crate::errors::{Result, SecretplaneError};
use crate::secrets::types::SecretValue;
use crate::storage::InternalContentRepository;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub struct ControllerProvider {
    content: Arc<dyn InternalContentRepository>,
}

impl ControllerProvider {
    pub fn new(content: Arc<dyn InternalContentRepository>) -> Self {
        Self { content }
    }
}

#[async_trait]
impl SecretBackendProvider for ControllerProvider {
    fn provider_type(&self) -> &'static str {
        CONTROLLER_BACKEND_TYPE
    }

    fn validate_config(&self, _old: Option<&BackendConfig>, new: &BackendConfig) -> Result<()> {
        check_known_keys(new, &[], CONTROLLER_BACKEND_TYPE)
    }

    fn new_backend(&self, config: &ProviderConfig) -> Result<Box<dyn SecretsBackend>> {
        Ok(Box::new(ControllerBackend {
            backend_id: config.backend_id.clone(),
            content: self.content.clone(),
        }))
    }
}

pub struct ControllerBackend {
    backend_id: BackendId,
    content: Arc<dyn InternalContentRepository>,
}

impl std::fmt::Debug for ControllerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerBackend").field("backend_id", &self.backend_id).finish()
    }
}

#[async_trait]
impl SecretsBackend for ControllerBackend {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn get_content(&self, revision_id: &str) -> Result<SecretValue> {
        self.content
            .get(revision_id)
            .await?
            .ok_or_else(|| SecretplaneError::not_found("secret content", revision_id))
    }

    async fn save_content(
        &self,
        uri: &SecretUri,
        revision: i64,
        value: &SecretValue,
    ) -> Result<String> {
        let revision_id = uuid::Uuid::new_v4().to_string();
        self.content.insert(&revision_id, &self.backend_id, uri, revision, value).await?;
        debug!(uri = %uri, revision, revision_id = %revision_id, "Stored content in controller backend");
        Ok(revision_id)
    }

    async fn delete_content(&self, revision_id: &str) -> Result<()> {
        if !self.content.delete(revision_id).await? {
            debug!(revision_id, "Controller content already removed");
        }
        Ok(())
    }
}
