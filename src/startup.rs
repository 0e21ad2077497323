//! Controller assembly
//!
//! Builds the store, the provider registry, the services and the facades
//! from an [`AppConfig`], then supervises the long-running loops: one
//! migration coordinator and one model-owner migration worker per
//! configured model, plus the token rotation worker.

use crate::api::{MigrationApi, SecretAccessApi, SecretBackendsApi};
use crate::config::AppConfig;
use crate::domain::Tag;
use crate::errors::Result;
use crate::migration::{FixedLeadership, MigrationCoordinator, MigrationWorker, TaskScheduler};
use crate::runtime::{Notifier, Supervisor};
use crate::secrets::{
    AccessControlEvaluator, CloudCredentialService, ContentRouter, NoCloudCredentials,
    ProviderRegistry, SecretBackendService, TokenRotationWorker,
};
use crate::storage::{create_pool, DbPool, Store};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Everything the controller runs, wired together
pub struct Controller {
    pub config: AppConfig,
    pub store: Store,
    pub notifier: Notifier,
    pub registry: Arc<ProviderRegistry>,
    pub router: Arc<ContentRouter>,
    pub service: Arc<SecretBackendService>,
    pub evaluator: Arc<AccessControlEvaluator>,
    pub scheduler: TaskScheduler,
}

impl Controller {
    /// Connect to the configured database and assemble the controller
    pub async fn connect(config: AppConfig) -> Result<Self> {
        let pool = create_pool(&config.database).await?;
        Self::assemble(config, pool, Arc::new(NoCloudCredentials)).await
    }

    /// Assemble over an existing pool. The internal backend is created if
    /// it does not exist yet.
    pub async fn assemble(
        config: AppConfig,
        pool: DbPool,
        clouds: Arc<dyn CloudCredentialService>,
    ) -> Result<Self> {
        let notifier = Notifier::new();
        let store = Store::new(pool, notifier.clone());
        let registry = Arc::new(ProviderRegistry::with_defaults(store.internal_content.clone()));
        Self::with_registry(config, store, notifier, registry, clouds).await
    }

    /// Assemble with a caller-supplied provider registry
    pub async fn with_registry(
        config: AppConfig,
        store: Store,
        notifier: Notifier,
        registry: Arc<ProviderRegistry>,
        clouds: Arc<dyn CloudCredentialService>,
    ) -> Result<Self> {
        let router = Arc::new(ContentRouter::new(
            store.backends.clone(),
            store.models.clone(),
            registry.clone(),
            clouds,
            notifier.clone(),
            &config.secret_backends,
        ));
        let service = Arc::new(SecretBackendService::new(
            store.backends.clone(),
            store.secrets.clone(),
            store.models.clone(),
            registry.clone(),
            router.clone(),
            notifier.clone(),
            &config.secret_backends,
        ));
        let evaluator =
            Arc::new(AccessControlEvaluator::new(store.secrets.clone(), store.grants.clone()));
        let scheduler =
            TaskScheduler::new(store.secrets.clone(), store.tasks.clone(), router.clone());

        let internal = service.ensure_internal_backend(&config.controller.controller_uuid).await?;
        info!(
            backend_id = %internal.id,
            providers = ?registry.provider_types(),
            "Secret control plane assembled"
        );

        Ok(Self { config, store, notifier, registry, router, service, evaluator, scheduler })
    }

    pub fn backends_api(&self) -> SecretBackendsApi {
        SecretBackendsApi::new(self.service.clone())
    }

    pub fn access_api(&self) -> SecretAccessApi {
        SecretAccessApi::new(self.evaluator.clone())
    }

    pub fn migration_api(&self) -> MigrationApi {
        MigrationApi::new(
            self.scheduler.clone(),
            self.store.tasks.clone(),
            self.service.clone(),
            self.notifier.clone(),
        )
    }

    /// Start every controller loop under a supervisor tied to `shutdown`
    pub fn spawn_loops(&self, shutdown: &CancellationToken) -> Result<Supervisor> {
        let mut supervisor = Supervisor::with_parent("secretplane", shutdown);

        for model_uuid in &self.config.controller.model_uuids {
            let coordinator = MigrationCoordinator::new(
                model_uuid.clone(),
                self.scheduler.clone(),
                self.store.tasks.clone(),
                self.notifier.clone(),
                &self.config.migration,
            );
            supervisor.spawn(format!("migration-coordinator-{}", model_uuid), |token| {
                coordinator.run(token)
            });

            let worker = MigrationWorker::new(
                model_uuid.clone(),
                Tag::model(model_uuid.clone()),
                self.store.secrets.clone(),
                self.store.tasks.clone(),
                self.router.clone(),
                Arc::new(FixedLeadership(true)),
                self.notifier.clone(),
            )?;
            supervisor.spawn(format!("migration-worker-{}", model_uuid), |token| worker.run(token));
        }

        let rotation = TokenRotationWorker::new(
            self.service.clone(),
            self.notifier.clone(),
            self.config.rotation.retry_delay(),
        );
        supervisor.spawn("token-rotation", |token| rotation.run(token));

        Ok(supervisor)
    }

    /// Run the loops until `shutdown` fires or one of them fails
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let supervisor = self.spawn_loops(&shutdown)?;
        info!(loops = supervisor.len(), "Secret control plane running");
        let result = supervisor.wait().await;
        self.notifier.close_all();
        result
    }
}
