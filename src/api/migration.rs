//! Controller-internal facade for migration bookkeeping and token rotation
//!
//! Only controller agents may call these. Watch calls hand back a live
//! [`Watcher`]; the caller releases it by dropping it.

use super::auth::{require_controller_agent, AuthContext};
use super::error::ErrorResults;
use crate::domain::{BackendId, MigrationTask, RotationChange, Tag, TaskEvent, TaskState};
use crate::errors::Result;
use crate::migration::TaskScheduler;
use crate::runtime::{Notifier, Watcher};
use crate::secrets::SecretBackendService;
use crate::storage::MigrationTaskRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoveMigrationTasksArgs {
    pub model_uuid: String,
    /// Owner tags; empty removes every completed task
    #[serde(default)]
    pub owner_tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RotateBackendTokenArgs {
    pub backend_ids: Vec<String>,
}

/// Initial rotation schedule plus the stream of later changes
pub struct RotationChanges {
    pub initial: Vec<RotationChange>,
    pub watcher: Watcher<(), RotationChange>,
}

pub struct MigrationApi {
    scheduler: TaskScheduler,
    tasks: Arc<dyn MigrationTaskRepository>,
    service: Arc<SecretBackendService>,
    notifier: Notifier,
}

impl MigrationApi {
    pub fn new(
        scheduler: TaskScheduler,
        tasks: Arc<dyn MigrationTaskRepository>,
        service: Arc<SecretBackendService>,
        notifier: Notifier,
    ) -> Self {
        Self { scheduler, tasks, service, notifier }
    }

    pub fn watch_for_failed_secret_migration_tasks(
        &self,
        auth: &AuthContext,
        model_uuid: &str,
    ) -> Result<Watcher<String, TaskEvent>> {
        require_controller_agent(auth)?;
        Ok(self.notifier.tasks_failed.subscribe(model_uuid.to_string()))
    }

    pub fn watch_for_completed_secret_migration_tasks(
        &self,
        auth: &AuthContext,
        model_uuid: &str,
    ) -> Result<Watcher<String, TaskEvent>> {
        require_controller_agent(auth)?;
        Ok(self.notifier.tasks_completed.subscribe(model_uuid.to_string()))
    }

    /// Schedule tasks for every owner with content outside the active backend
    #[instrument(skip(self, auth), fields(principal = %auth.principal), name = "api_schedule_secret_migration_tasks")]
    pub async fn schedule_secret_migration_tasks(
        &self,
        auth: &AuthContext,
        model_uuid: &str,
    ) -> Result<Vec<Tag>> {
        require_controller_agent(auth)?;
        self.scheduler.schedule(model_uuid).await
    }

    /// Remove the named tasks, or every completed task when none are named.
    /// Returns how many were removed.
    #[instrument(skip(self, auth, args), fields(principal = %auth.principal, model_uuid = %args.model_uuid), name = "api_remove_secret_migration_tasks")]
    pub async fn remove_secret_migration_tasks(
        &self,
        auth: &AuthContext,
        args: RemoveMigrationTasksArgs,
    ) -> Result<u64> {
        require_controller_agent(auth)?;
        let removed = if args.owner_tags.is_empty() {
            self.tasks.remove_completed(&args.model_uuid).await?
        } else {
            let owners = args
                .owner_tags
                .iter()
                .map(|s| s.parse::<Tag>())
                .collect::<Result<Vec<_>>>()?;
            self.tasks.remove(&args.model_uuid, &owners).await?
        };
        info!(removed, "Removed secret migration tasks");
        Ok(removed)
    }

    /// Tasks of a model, optionally in one state
    pub async fn secret_migration_tasks(
        &self,
        auth: &AuthContext,
        model_uuid: &str,
        state: Option<TaskState>,
    ) -> Result<Vec<MigrationTask>> {
        require_controller_agent(auth)?;
        self.tasks.list(model_uuid, state).await
    }

    #[instrument(skip(self, auth, args), fields(principal = %auth.principal, count = args.backend_ids.len()), name = "api_rotate_backend_token")]
    pub async fn rotate_backend_token(
        &self,
        auth: &AuthContext,
        args: RotateBackendTokenArgs,
    ) -> Result<ErrorResults> {
        require_controller_agent(auth)?;
        let mut results = Vec::with_capacity(args.backend_ids.len());
        for id in args.backend_ids {
            results.push(self.service.rotate_backend_token(&BackendId::from(id)).await.into());
        }
        Ok(ErrorResults { results })
    }

    /// Subscribe first, then read the schedule, so no change falls between
    pub async fn watch_secret_backend_rotation_changes(
        &self,
        auth: &AuthContext,
    ) -> Result<RotationChanges> {
        require_controller_agent(auth)?;
        let watcher = self.notifier.backend_rotation.subscribe(());
        let initial = self.service.rotation_schedule().await?;
        Ok(RotationChanges { initial, watcher })
    }
}
