//! In-memory secret backend provider with failure injection.
//!
//! Every backend built by one [`FakeProvider`] shares a [`FakeState`], so a
//! test can inspect stored content and flip failure switches while the
//! router holds cached clients.

use async_trait::async_trait;
use dashmap::DashMap;
use secretplane::domain::{BackendConfig, SecretUri};
use secretplane::errors::{Result, SecretplaneError};
use secretplane::secrets::{ProviderConfig, SecretBackendProvider, SecretValue, SecretsBackend};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct FakeState {
    pub content: DashMap<String, SecretValue>,
    pub fail_ping: AtomicBool,
    pub fail_get: AtomicBool,
    pub fail_save: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_refresh: AtomicBool,
    pub saves: AtomicUsize,
    pub deletes: AtomicUsize,
    pub refreshes: AtomicUsize,
}

impl FakeState {
    pub fn set_fail_save(&self, fail: bool) {
        self.fail_save.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_ping(&self, fail: bool) {
        self.fail_ping.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_refresh(&self, fail: bool) {
        self.fail_refresh.store(fail, Ordering::SeqCst);
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn stored(&self, revision_id: &str) -> Option<SecretValue> {
        self.content.get(revision_id).map(|v| v.clone())
    }
}

pub struct FakeProvider {
    provider_type: &'static str,
    token_refresh: bool,
    pub state: Arc<FakeState>,
}

impl FakeProvider {
    /// A provider registered under `provider_type`, replacing any built-in
    pub fn new(provider_type: &'static str) -> Self {
        Self { provider_type, token_refresh: false, state: Arc::new(FakeState::default()) }
    }

    pub fn with_token_refresh(mut self) -> Self {
        self.token_refresh = true;
        self
    }
}

fn injected(name: &str, operation: &str) -> SecretplaneError {
    SecretplaneError::backend(name, format!("injected {} failure", operation))
}

#[async_trait]
impl SecretBackendProvider for FakeProvider {
    fn provider_type(&self) -> &'static str {
        self.provider_type
    }

    fn sensitive_keys(&self) -> &'static [&'static str] {
        &["token"]
    }

    fn supports_token_refresh(&self) -> bool {
        self.token_refresh
    }

    async fn refresh_token(&self, config: &BackendConfig) -> Result<BackendConfig> {
        if self.state.fail_refresh.load(Ordering::SeqCst) {
            return Err(injected(self.provider_type, "refresh"));
        }
        let count = self.state.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        let mut refreshed = config.clone();
        refreshed.insert("token".into(), Value::String(format!("refreshed-{}", count)));
        Ok(refreshed)
    }

    fn new_backend(&self, config: &ProviderConfig) -> Result<Box<dyn SecretsBackend>> {
        Ok(Box::new(FakeBackend { name: config.backend_name.clone(), state: self.state.clone() }))
    }
}

#[derive(Debug)]
pub struct FakeBackend {
    name: String,
    state: Arc<FakeState>,
}

#[async_trait]
impl SecretsBackend for FakeBackend {
    async fn ping(&self) -> Result<()> {
        if self.state.fail_ping.load(Ordering::SeqCst) {
            return Err(injected(&self.name, "ping"));
        }
        Ok(())
    }

    async fn get_content(&self, revision_id: &str) -> Result<SecretValue> {
        if self.state.fail_get.load(Ordering::SeqCst) {
            return Err(injected(&self.name, "get"));
        }
        self.state
            .stored(revision_id)
            .ok_or_else(|| SecretplaneError::not_found("secret content", revision_id))
    }

    async fn save_content(
        &self,
        uri: &SecretUri,
        revision: i64,
        value: &SecretValue,
    ) -> Result<String> {
        if self.state.fail_save.load(Ordering::SeqCst) {
            return Err(injected(&self.name, "save"));
        }
        let revision_id = format!("{}-{}", uri.id(), revision);
        self.state.content.insert(revision_id.clone(), value.clone());
        self.state.saves.fetch_add(1, Ordering::SeqCst);
        Ok(revision_id)
    }

    async fn delete_content(&self, revision_id: &str) -> Result<()> {
        if self.state.fail_delete.load(Ordering::SeqCst) {
            return Err(injected(&self.name, "delete"));
        }
        self.state.content.remove(revision_id);
        self.state.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
