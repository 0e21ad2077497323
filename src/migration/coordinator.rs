//! Migration coordinator
//!
//! One loop per model. It watches the model's config for a change of the
//! active secret backend and schedules a migration task for every owner
//! with content outside the new active backend. Failed-task notifications
//! arm a single retry timer; completed-task notifications clear finished
//! bookkeeping. Closure of any stream is fatal.

use crate::config::MigrationConfig;
use crate::domain::{BackendId, Tag, TaskState};
use crate::errors::{Result, SecretplaneError};
use crate::observability::MetricsRecorder;
use crate::runtime::Notifier;
use crate::secrets::ContentRouter;
use crate::storage::{MigrationTaskRepository, SecretRepository};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Schedules migration tasks against a model's current active backend
#[derive(Clone)]
pub struct TaskScheduler {
    secrets: Arc<dyn SecretRepository>,
    tasks: Arc<dyn MigrationTaskRepository>,
    router: Arc<ContentRouter>,
    metrics: MetricsRecorder,
}

impl TaskScheduler {
    pub fn new(
        secrets: Arc<dyn SecretRepository>,
        tasks: Arc<dyn MigrationTaskRepository>,
        router: Arc<ContentRouter>,
    ) -> Self {
        Self { secrets, tasks, router, metrics: MetricsRecorder::new() }
    }

    /// Resolve the model's active backend without the cache
    pub async fn active_backend(&self, model_uuid: &str) -> Result<BackendId> {
        Ok(self.router.refresh_backend_config_info(model_uuid).await?.active_id.clone())
    }

    /// Schedule a task for every owner with a revision outside `active`.
    /// Returns the scheduled owners.
    #[instrument(skip(self), fields(model_uuid = %model_uuid, active = %active), name = "schedule_migration_tasks")]
    pub async fn schedule_for(&self, model_uuid: &str, active: &BackendId) -> Result<Vec<Tag>> {
        let owners = self.secrets.owners_needing_migration(model_uuid, active).await?;
        if owners.is_empty() {
            debug!("No secret content to migrate");
            return Ok(owners);
        }
        let scheduled = self.tasks.schedule(model_uuid, &owners).await?;
        self.metrics.record_tasks_scheduled(scheduled);
        info!(owners = scheduled, "Scheduled secret migration tasks");
        Ok(owners)
    }

    /// Resolve the active backend and schedule against it
    pub async fn schedule(&self, model_uuid: &str) -> Result<Vec<Tag>> {
        let active = self.active_backend(model_uuid).await?;
        self.schedule_for(model_uuid, &active).await
    }
}

pub struct MigrationCoordinator {
    model_uuid: String,
    scheduler: TaskScheduler,
    tasks: Arc<dyn MigrationTaskRepository>,
    notifier: Notifier,
    retry_backoff: Duration,
    max_attempts: u32,
}

async fn armed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}

impl MigrationCoordinator {
    pub fn new(
        model_uuid: impl Into<String>,
        scheduler: TaskScheduler,
        tasks: Arc<dyn MigrationTaskRepository>,
        notifier: Notifier,
        settings: &MigrationConfig,
    ) -> Self {
        Self {
            model_uuid: model_uuid.into(),
            scheduler,
            tasks,
            notifier,
            retry_backoff: settings.retry_backoff(),
            max_attempts: settings.max_attempts,
        }
    }

    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let model = self.model_uuid.clone();
        let mut config_changes = self.notifier.model_config.subscribe(model.clone());
        let mut failed = self.notifier.tasks_failed.subscribe(model.clone());
        let mut completed = self.notifier.tasks_completed.subscribe(model.clone());

        let mut last_active: Option<BackendId> = None;
        let mut retry: Option<Pin<Box<Sleep>>> = None;

        info!(model_uuid = %model, "Secret migration coordinator started");
        self.on_config_changed(&mut last_active).await?;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(model_uuid = %model, "Secret migration coordinator stopping");
                    return Ok(());
                }
                change = config_changes.next() => match change {
                    Some(()) => {
                        config_changes.drain_pending();
                        self.on_config_changed(&mut last_active).await?;
                    }
                    None => return Err(SecretplaneError::watcher_closed("model config")),
                },
                event = failed.next() => match event {
                    Some(event) => {
                        warn!(model_uuid = %model, owner = %event.owner, "Secret migration task failed");
                        if retry.is_none() {
                            debug!(backoff_secs = self.retry_backoff.as_secs(), "Arming migration retry");
                            retry = Some(Box::pin(tokio::time::sleep(self.retry_backoff)));
                        }
                    }
                    None => return Err(SecretplaneError::watcher_closed("failed migration tasks")),
                },
                event = completed.next() => match event {
                    Some(event) => {
                        completed.drain_pending();
                        let removed = self.tasks.remove_completed(&model).await?;
                        debug!(owner = %event.owner, removed, "Cleared completed migration tasks");
                    }
                    None => return Err(SecretplaneError::watcher_closed("completed migration tasks")),
                },
                _ = armed(&mut retry) => {
                    retry = None;
                    self.retry_failed().await?;
                }
            }
        }
    }

    /// Schedule tasks when the active backend differs from the last one seen.
    /// A model config that names an unusable backend is logged and skipped.
    async fn on_config_changed(&self, last_active: &mut Option<BackendId>) -> Result<()> {
        let active = match self.scheduler.active_backend(&self.model_uuid).await {
            Ok(active) => active,
            Err(e) if e.is_not_found() || e.is_not_supported() || e.is_not_valid() => {
                error!(model_uuid = %self.model_uuid, error = %e, "Cannot resolve active secret backend");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if last_active.as_ref() == Some(&active) {
            debug!(model_uuid = %self.model_uuid, active = %active, "Active secret backend unchanged");
            return Ok(());
        }
        info!(
            model_uuid = %self.model_uuid,
            from = ?last_active.as_ref().map(BackendId::as_str),
            to = %active,
            "Active secret backend changed"
        );
        *last_active = Some(active.clone());
        self.scheduler.schedule_for(&self.model_uuid, &active).await?;
        Ok(())
    }

    /// Reschedule failed tasks still under the attempt limit
    async fn retry_failed(&self) -> Result<()> {
        let rescheduled = self.tasks.reschedule_failed(&self.model_uuid, self.max_attempts).await?;
        if !rescheduled.is_empty() {
            info!(model_uuid = %self.model_uuid, owners = rescheduled.len(), "Retrying failed secret migrations");
        }
        for task in self.tasks.list(&self.model_uuid, Some(TaskState::Failed)).await? {
            error!(
                model_uuid = %self.model_uuid,
                owner = %task.owner,
                attempts = task.attempts,
                last_error = task.last_error.as_deref().unwrap_or(""),
                "Secret migration gave up"
            );
        }
        Ok(())
    }
}
