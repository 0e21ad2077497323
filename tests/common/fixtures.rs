//! A controller assembled over a test database, with the `vault` backend
//! type served by an in-memory [`FakeProvider`].

use super::fake_provider::{FakeProvider, FakeState};
use super::test_db::TestDatabase;
use secretplane::config::AppConfig;
use secretplane::domain::{
    CreateSecretBackendParams, CreateSecretParams, Model, ModelType, ModelUuid, RevisionContent,
    SecretBackend, SecretMetadata, SecretUri, Tag, ValueRef,
};
use secretplane::runtime::Notifier;
use secretplane::secrets::{NoCloudCredentials, ProviderRegistry, SecretValue};
use secretplane::startup::Controller;
use secretplane::storage::Store;
use serde_json::json;
use std::sync::Arc;

pub const CONTROLLER_UUID: &str = "5f1c1a3e-3a0b-4f43-9f3e-2d4b7c9a0e01";
pub const MODEL_UUID: &str = "8c3b5b5a-0f2a-4cfd-9a6f-8d1f8e1d9a11";

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.controller.controller_uuid = CONTROLLER_UUID.to_string();
    config.controller.model_uuids = vec![MODEL_UUID.to_string()];
    config.secret_backends.call_timeout_seconds = 5;
    config.secret_backends.cache_ttl_seconds = 0;
    config.migration.retry_backoff_seconds = 1;
    config.migration.max_attempts = 3;
    config.rotation.retry_delay_seconds = 1;
    config
}

pub struct TestController {
    pub db: TestDatabase,
    pub controller: Controller,
    /// Shared state of every `vault` backend
    pub vault: Arc<FakeState>,
}

impl TestController {
    pub async fn new(prefix: &str) -> Self {
        Self::with_config(prefix, test_config()).await
    }

    pub async fn with_config(prefix: &str, config: AppConfig) -> Self {
        let db = TestDatabase::new(prefix).await;
        let notifier = Notifier::new();
        let store = Store::new(db.pool.clone(), notifier.clone());

        let fake = FakeProvider::new("vault").with_token_refresh();
        let vault = fake.state.clone();
        let mut registry = ProviderRegistry::with_defaults(store.internal_content.clone());
        registry.register(Arc::new(fake));

        let controller = Controller::with_registry(
            config,
            store,
            notifier,
            Arc::new(registry),
            Arc::new(NoCloudCredentials),
        )
        .await
        .expect("assemble controller");

        let mut model =
            Model::new(ModelUuid::from(MODEL_UUID), "wordpress-model", ModelType::Iaas);
        model.secret_backend = "internal".to_string();
        controller.store.models.upsert(&model).await.expect("create model");

        Self { db, controller, vault }
    }

    /// Register a `vault` backend without pinging it
    pub async fn add_vault(&self, name: &str) -> SecretBackend {
        self.controller
            .service
            .create_secret_backend(
                CreateSecretBackendParams {
                    name: name.to_string(),
                    backend_type: "vault".to_string(),
                    config: json!({"endpoint": "http://vault.internal:8200", "token": "s.root"})
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                    ..Default::default()
                },
                true,
            )
            .await
            .expect("create vault backend")
    }

    /// Point the model at another backend, notifying config watchers
    pub async fn set_model_backend(&self, value: &str) {
        self.controller
            .store
            .models
            .set_secret_backend(MODEL_UUID, value)
            .await
            .expect("set model secret backend");
    }

    /// Create a secret owned by `owner` with `revisions` revisions, each
    /// written to the model's current active backend.
    pub async fn create_secret(
        &self,
        uri: &SecretUri,
        owner: Tag,
        revisions: i64,
    ) -> SecretMetadata {
        let router = &self.controller.router;
        let first = router
            .save_content(MODEL_UUID, uri, 1, &content(1))
            .await
            .expect("save revision 1 content");
        let metadata = self
            .controller
            .store
            .secrets
            .create_secret(CreateSecretParams::new(
                uri.clone(),
                MODEL_UUID,
                owner,
                RevisionContent::External(first),
            ))
            .await
            .expect("create secret");

        for revision in 2..=revisions {
            let value_ref = router
                .save_content(MODEL_UUID, uri, revision, &content(revision))
                .await
                .expect("save revision content");
            self.controller
                .store
                .secrets
                .add_revision(uri, RevisionContent::External(value_ref), None)
                .await
                .expect("add revision");
        }
        metadata
    }

    pub async fn value_ref(&self, uri: &SecretUri, revision: i64) -> ValueRef {
        self.controller
            .store
            .secrets
            .get_revision(uri, revision)
            .await
            .expect("read revision")
            .expect("revision exists")
            .content
            .value_ref()
            .cloned()
            .expect("revision stored externally")
    }
}

/// Well-formed content distinct per revision
pub fn content(revision: i64) -> SecretValue {
    let encoded = match revision {
        1 => "cGFzc3dvcmQtMQ==",
        2 => "cGFzc3dvcmQtMg==",
        3 => "cGFzc3dvcmQtMw==",
        _ => "cGFzc3dvcmQ=",
    };
    SecretValue::from_stored([("password".to_string(), encoded.to_string())].into_iter().collect())
}
