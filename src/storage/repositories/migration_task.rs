//! Migration task repository
//!
//! Task bookkeeping for backend migrations, keyed by (model, owner). State
//! transitions publish on the matching notification stream after commit:
//! scheduling notifies the owner's worker, failure and completion notify the
//! model's coordinator.

use crate::domain::{MigrationTask, Tag, TaskEvent, TaskState};
use crate::errors::{Result, SecretplaneError};
use crate::runtime::Notifier;
use crate::storage::DbPool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::instrument;

#[derive(Debug, Clone, FromRow)]
struct MigrationTaskRow {
    pub model_uuid: String,
    pub owner_tag: String,
    pub state: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<MigrationTaskRow> for MigrationTask {
    type Error = SecretplaneError;

    fn try_from(row: MigrationTaskRow) -> Result<Self> {
        Ok(MigrationTask {
            model_uuid: row.model_uuid,
            owner: row.owner_tag.parse()?,
            state: row.state.parse()?,
            attempts: row.attempts,
            last_error: row.last_error,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
pub trait MigrationTaskRepository: Send + Sync {
    /// Schedule a task for each owner, resetting attempts. Returns the
    /// number of tasks scheduled.
    async fn schedule(&self, model_uuid: &str, owners: &[Tag]) -> Result<usize>;

    async fn get(&self, model_uuid: &str, owner: &Tag) -> Result<Option<MigrationTask>>;

    /// Tasks of a model, optionally restricted to one state
    async fn list(&self, model_uuid: &str, state: Option<TaskState>) -> Result<Vec<MigrationTask>>;

    /// Record a failed pass
    async fn fail(&self, model_uuid: &str, owner: &Tag, error: &str) -> Result<MigrationTask>;

    /// Record a successful pass
    async fn complete(&self, model_uuid: &str, owner: &Tag) -> Result<MigrationTask>;

    /// Delete completed tasks, returning how many were removed
    async fn remove_completed(&self, model_uuid: &str) -> Result<u64>;

    /// Delete the tasks of the given owners regardless of state
    async fn remove(&self, model_uuid: &str, owners: &[Tag]) -> Result<u64>;

    /// Move failed tasks below `max_attempts` back to scheduled. Returns the
    /// rescheduled owners.
    async fn reschedule_failed(&self, model_uuid: &str, max_attempts: u32) -> Result<Vec<Tag>>;
}

#[derive(Debug, Clone)]
pub struct SqlxMigrationTaskRepository {
    pool: DbPool,
    notifier: Notifier,
}

impl SqlxMigrationTaskRepository {
    pub fn new(pool: DbPool, notifier: Notifier) -> Self {
        Self { pool, notifier }
    }

    fn notify_scheduled(&self, model_uuid: &str, owners: &[Tag]) {
        for owner in owners {
            self.notifier.tasks_scheduled.publish(&(model_uuid.to_string(), owner.clone()), ());
        }
    }

    async fn transition(
        &self,
        model_uuid: &str,
        owner: &Tag,
        state: TaskState,
        error: Option<&str>,
    ) -> Result<MigrationTask> {
        let attempts_delta = if state == TaskState::Failed { 1 } else { 0 };
        let row = sqlx::query_as::<_, MigrationTaskRow>(
            "UPDATE migration_tasks SET state = $3, attempts = attempts + $4, last_error = $5, updated_at = $6 \
             WHERE model_uuid = $1 AND owner_tag = $2 \
             RETURNING model_uuid, owner_tag, state, attempts, last_error, updated_at",
        )
        .bind(model_uuid)
        .bind(owner.to_string())
        .bind(state.as_str())
        .bind(attempts_delta)
        .bind(error)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            SecretplaneError::database(e, format!("Failed to mark migration task of {} {}", owner, state))
        })?
        .ok_or_else(|| SecretplaneError::not_found("migration task", owner.to_string()))?;

        let task: MigrationTask = row.try_into()?;
        let event = TaskEvent { model_uuid: model_uuid.to_string(), owner: owner.clone(), state };
        match state {
            TaskState::Failed => self.notifier.tasks_failed.publish(&event.model_uuid.clone(), event),
            TaskState::Completed => {
                self.notifier.tasks_completed.publish(&event.model_uuid.clone(), event)
            }
            TaskState::Scheduled => 0,
        };
        Ok(task)
    }
}

#[async_trait]
impl MigrationTaskRepository for SqlxMigrationTaskRepository {
    #[instrument(skip(self, owners), fields(model_uuid = %model_uuid, owners = owners.len()), name = "db_schedule_migration_tasks")]
    async fn schedule(&self, model_uuid: &str, owners: &[Tag]) -> Result<usize> {
        if owners.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SecretplaneError::database(e, "Failed to begin task scheduling"))?;

        for owner in owners {
            sqlx::query(
                "INSERT INTO migration_tasks (model_uuid, owner_tag, state, attempts, last_error, updated_at) \
                 VALUES ($1, $2, 'scheduled', 0, NULL, $3) \
                 ON CONFLICT(model_uuid, owner_tag) DO UPDATE SET state = 'scheduled', attempts = 0, \
                 last_error = NULL, updated_at = excluded.updated_at",
            )
            .bind(model_uuid)
            .bind(owner.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                SecretplaneError::database(e, format!("Failed to schedule migration task for {}", owner))
            })?;
        }

        tx.commit()
            .await
            .map_err(|e| SecretplaneError::database(e, "Failed to commit task scheduling"))?;

        self.notify_scheduled(model_uuid, owners);
        Ok(owners.len())
    }

    #[instrument(skip(self), fields(model_uuid = %model_uuid, owner = %owner), name = "db_get_migration_task")]
    async fn get(&self, model_uuid: &str, owner: &Tag) -> Result<Option<MigrationTask>> {
        let row = sqlx::query_as::<_, MigrationTaskRow>(
            "SELECT model_uuid, owner_tag, state, attempts, last_error, updated_at \
             FROM migration_tasks WHERE model_uuid = $1 AND owner_tag = $2",
        )
        .bind(model_uuid)
        .bind(owner.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SecretplaneError::database(e, format!("Failed to fetch migration task of {}", owner)))?;

        row.map(|r| r.try_into()).transpose()
    }

    #[instrument(skip(self), fields(model_uuid = %model_uuid), name = "db_list_migration_tasks")]
    async fn list(&self, model_uuid: &str, state: Option<TaskState>) -> Result<Vec<MigrationTask>> {
        let rows = sqlx::query_as::<_, MigrationTaskRow>(
            "SELECT model_uuid, owner_tag, state, attempts, last_error, updated_at \
             FROM migration_tasks WHERE model_uuid = $1 AND ($2 IS NULL OR state = $2) \
             ORDER BY owner_tag",
        )
        .bind(model_uuid)
        .bind(state.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SecretplaneError::database(e, "Failed to list migration tasks"))?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn fail(&self, model_uuid: &str, owner: &Tag, error: &str) -> Result<MigrationTask> {
        self.transition(model_uuid, owner, TaskState::Failed, Some(error)).await
    }

    async fn complete(&self, model_uuid: &str, owner: &Tag) -> Result<MigrationTask> {
        self.transition(model_uuid, owner, TaskState::Completed, None).await
    }

    #[instrument(skip(self), fields(model_uuid = %model_uuid), name = "db_remove_completed_migration_tasks")]
    async fn remove_completed(&self, model_uuid: &str) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM migration_tasks WHERE model_uuid = $1 AND state = 'completed'")
                .bind(model_uuid)
                .execute(&self.pool)
                .await
                .map_err(|e| SecretplaneError::database(e, "Failed to remove completed migration tasks"))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, owners), fields(model_uuid = %model_uuid, owners = owners.len()), name = "db_remove_migration_tasks")]
    async fn remove(&self, model_uuid: &str, owners: &[Tag]) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SecretplaneError::database(e, "Failed to begin task removal"))?;

        let mut removed = 0;
        for owner in owners {
            let result =
                sqlx::query("DELETE FROM migration_tasks WHERE model_uuid = $1 AND owner_tag = $2")
                    .bind(model_uuid)
                    .bind(owner.to_string())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        SecretplaneError::database(e, format!("Failed to remove migration task of {}", owner))
                    })?;
            removed += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| SecretplaneError::database(e, "Failed to commit task removal"))?;
        Ok(removed)
    }

    #[instrument(skip(self), fields(model_uuid = %model_uuid, max_attempts = %max_attempts), name = "db_reschedule_failed_migration_tasks")]
    async fn reschedule_failed(&self, model_uuid: &str, max_attempts: u32) -> Result<Vec<Tag>> {
        let owners: Vec<String> = sqlx::query_scalar(
            "UPDATE migration_tasks SET state = 'scheduled', updated_at = $3 \
             WHERE model_uuid = $1 AND state = 'failed' AND attempts < $2 \
             RETURNING owner_tag",
        )
        .bind(model_uuid)
        .bind(i64::from(max_attempts))
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SecretplaneError::database(e, "Failed to reschedule failed migration tasks"))?;

        let owners = owners.iter().map(|o| o.parse()).collect::<Result<Vec<Tag>>>()?;
        self.notify_scheduled(model_uuid, &owners);
        Ok(owners)
    }
}
