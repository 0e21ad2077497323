//! Migration worker
//!
//! One loop per secret owner. A unit's worker also migrates its
//! application's secrets while the unit leads the application; a model
//! tag worker migrates model-owned secrets. Each pass re-resolves the
//! active backend and moves every externally stored revision outside it.
//! The first failing revision fails the pass; the coordinator retries the
//! whole pass.

use crate::domain::{SecretUri, Tag, TagKind, TaskState, ValueRef};
use crate::errors::{Result, SecretplaneError};
use crate::migration_span;
use crate::observability::MetricsRecorder;
use crate::runtime::{Notifier, OwnerKey, Watcher};
use crate::secrets::{BackendConfigInfo, ContentRouter};
use crate::storage::{MigrationTaskRepository, SecretRepository};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Application leadership, as seen by a unit
#[async_trait]
pub trait LeadershipTracker: Send + Sync {
    async fn is_leader(&self, unit: &Tag) -> Result<bool>;

    /// Resolves when leadership may have changed. Trackers without change
    /// notification never resolve.
    async fn changed(&self) {
        std::future::pending::<()>().await
    }
}

/// Leadership answer fixed at construction
#[derive(Debug, Clone, Copy)]
pub struct FixedLeadership(pub bool);

#[async_trait]
impl LeadershipTracker for FixedLeadership {
    async fn is_leader(&self, _unit: &Tag) -> Result<bool> {
        Ok(self.0)
    }
}

async fn next_or_pending(watcher: &mut Option<Watcher<OwnerKey, ()>>) -> Option<()> {
    match watcher {
        Some(watcher) => watcher.next().await,
        None => std::future::pending().await,
    }
}

pub struct MigrationWorker {
    model_uuid: String,
    owner: Tag,
    secrets: Arc<dyn SecretRepository>,
    tasks: Arc<dyn MigrationTaskRepository>,
    router: Arc<ContentRouter>,
    leadership: Arc<dyn LeadershipTracker>,
    notifier: Notifier,
    metrics: MetricsRecorder,
}

impl MigrationWorker {
    pub fn new(
        model_uuid: impl Into<String>,
        owner: Tag,
        secrets: Arc<dyn SecretRepository>,
        tasks: Arc<dyn MigrationTaskRepository>,
        router: Arc<ContentRouter>,
        leadership: Arc<dyn LeadershipTracker>,
        notifier: Notifier,
    ) -> Result<Self> {
        match owner.kind() {
            TagKind::Unit | TagKind::Model => {}
            _ => {
                return Err(SecretplaneError::not_valid(format!(
                    "migration worker owner {} must be a unit or a model",
                    owner
                )))
            }
        }
        Ok(Self {
            model_uuid: model_uuid.into(),
            owner,
            secrets,
            tasks,
            router,
            leadership,
            notifier,
            metrics: MetricsRecorder::new(),
        })
    }

    fn key(&self, owner: &Tag) -> OwnerKey {
        (self.model_uuid.clone(), owner.clone())
    }

    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let mut own = self.notifier.tasks_scheduled.subscribe(self.key(&self.owner));

        // Application passes are gated on leadership at the time of the pass
        let application = self.owner.application_name().map(Tag::application);
        let mut app_watcher =
            application.as_ref().map(|app| self.notifier.tasks_scheduled.subscribe(self.key(app)));
        let leader = match &application {
            Some(_) => self.leadership.is_leader(&self.owner).await?,
            None => false,
        };
        info!(
            model_uuid = %self.model_uuid,
            owner = %self.owner,
            leader,
            "Secret migration worker started"
        );

        self.drain_scheduled(&self.owner).await?;
        if let (Some(app), true) = (&application, leader) {
            self.drain_scheduled(app).await?;
        }

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(owner = %self.owner, "Secret migration worker stopping");
                    return Ok(());
                }
                event = own.next() => match event {
                    Some(()) => {
                        own.drain_pending();
                        self.pass(&self.owner).await?;
                    }
                    None => return Err(SecretplaneError::watcher_closed("scheduled migration tasks")),
                },
                event = next_or_pending(&mut app_watcher) => match (event, &application) {
                    (Some(()), Some(app)) => {
                        if let Some(watcher) = app_watcher.as_mut() {
                            watcher.drain_pending();
                        }
                        if self.leadership.is_leader(&self.owner).await? {
                            self.pass(app).await?;
                        } else {
                            info!(owner = %self.owner, application = %app, "No longer leader, leaving application secrets");
                        }
                    }
                    (Some(()), None) => {}
                    (None, _) => {
                        return Err(SecretplaneError::watcher_closed("scheduled migration tasks"))
                    }
                },
                _ = self.leadership.changed(), if application.is_some() => {
                    if let Some(app) = &application {
                        if self.leadership.is_leader(&self.owner).await? {
                            info!(owner = %self.owner, application = %app, "Leadership gained, checking application secrets");
                            self.drain_scheduled(app).await?;
                        }
                    }
                }
            }
        }
    }

    /// Run a pass for a task already scheduled before the worker started
    async fn drain_scheduled(&self, target: &Tag) -> Result<()> {
        match self.tasks.get(&self.model_uuid, target).await? {
            Some(task) if task.state == TaskState::Scheduled => self.pass(target).await,
            _ => Ok(()),
        }
    }

    /// Migrate everything `target` owns and report the outcome on its task
    async fn pass(&self, target: &Tag) -> Result<()> {
        let span = migration_span!(self.model_uuid, target);
        async {
            let report = match self.migrate_owned(target).await {
                Ok(moved) => {
                    info!(moved, "Secret migration pass completed");
                    self.tasks.complete(&self.model_uuid, target).await
                }
                Err(e) => {
                    warn!(error = %e, "Secret migration pass failed");
                    self.tasks.fail(&self.model_uuid, target, &e.to_string()).await
                }
            };
            match report {
                Ok(_) => Ok(()),
                Err(e) if e.is_not_found() => {
                    debug!("Migration task removed during pass");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        .instrument(span)
        .await
    }

    /// Move every revision of `target`'s secrets into the active backend,
    /// returning how many were moved.
    pub async fn migrate_owned(&self, target: &Tag) -> Result<usize> {
        let info = self.router.refresh_backend_config_info(&self.model_uuid).await?;
        let mut moved = 0;

        for metadata in self.secrets.list_owned(&self.model_uuid, target).await? {
            if &metadata.owner != target {
                continue;
            }
            for revision in self.secrets.list_revisions(&metadata.uri).await? {
                let Some(from) = revision.content.value_ref() else {
                    continue;
                };
                if from.backend_id == info.active_id {
                    continue;
                }
                let result = self.migrate_revision(&info, &metadata.uri, revision.revision, from).await;
                self.metrics.record_revision_migration(result.is_ok());
                result?;
                moved += 1;
            }
        }
        Ok(moved)
    }

    /// Write the content to the active backend, switch the reference, then
    /// remove the old copy. Until the switch commits the revision keeps
    /// pointing at readable content in the old backend.
    async fn migrate_revision(
        &self,
        info: &BackendConfigInfo,
        uri: &SecretUri,
        revision: i64,
        from: &ValueRef,
    ) -> Result<()> {
        let to = self.router.move_content(info, uri, revision, from).await?;

        if let Err(e) = self.secrets.change_revision_backend(uri, revision, from, &to).await {
            // Another writer may already reference the same location
            match self.secrets.get_revision(uri, revision).await {
                Ok(Some(current)) if current.content.value_ref() == Some(&to) => {
                    debug!(uri = %uri, revision, to = %to, "Revision already references the new copy");
                    return Ok(());
                }
                Ok(_) => {
                    if let Err(cleanup) = self.router.delete_content_with(info, &to).await {
                        warn!(uri = %uri, revision, copy = %to, error = %cleanup, "Failed to remove unreferenced copy");
                    }
                }
                Err(read) => {
                    warn!(uri = %uri, revision, copy = %to, error = %read, "Cannot re-read revision, keeping copy");
                }
            }
            return Err(e);
        }

        if let Err(e) = self.router.delete_content_with(info, from).await {
            warn!(uri = %uri, revision, old = %from, error = %e, "Failed to remove migrated content from old backend");
        }
        debug!(uri = %uri, revision, from = %from, to = %to, "Migrated secret revision");
        Ok(())
    }
}
