//! Secret backend repository
//!
//! Persists backend instances and answers the reference questions the
//! registry service needs: how many revisions point at a backend and when
//! each backend's token is next due for rotation.

use super::is_unique_violation;
use crate::domain::{BackendConfig, BackendId, RotationChange, SecretBackend};
use crate::errors::{Result, SecretplaneError};
use crate::storage::DbPool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::collections::HashMap;
use std::time::Duration;
use tracing::instrument;

#[derive(Debug, Clone, FromRow)]
struct SecretBackendRow {
    pub id: String,
    pub name: String,
    pub backend_type: String,
    pub config: String,
    pub token_rotate_interval_secs: Option<i64>,
    pub next_rotate_time: Option<DateTime<Utc>>,
}

impl TryFrom<SecretBackendRow> for SecretBackend {
    type Error = SecretplaneError;

    fn try_from(row: SecretBackendRow) -> Result<Self> {
        let config: BackendConfig = serde_json::from_str(&row.config).map_err(|e| {
            SecretplaneError::Serialization {
                source: e,
                context: format!("Invalid config stored for secret backend '{}'", row.name),
            }
        })?;

        Ok(SecretBackend {
            id: BackendId::from_string(row.id),
            name: row.name,
            backend_type: row.backend_type,
            config,
            token_rotate_interval: row
                .token_rotate_interval_secs
                .map(|secs| Duration::from_secs(secs.max(0) as u64)),
            next_rotate_time: row.next_rotate_time,
        })
    }
}

/// Outcome of a backend delete
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedBackend {
    pub backend: SecretBackend,
    /// Revisions that still referenced the backend
    pub references: i64,
}

#[async_trait]
pub trait SecretBackendRepository: Send + Sync {
    /// Insert a new backend; `AlreadyExists` on a duplicate id or name
    async fn create(&self, backend: &SecretBackend) -> Result<SecretBackend>;

    async fn get(&self, id: &BackendId) -> Result<Option<SecretBackend>>;

    async fn get_by_name(&self, name: &str) -> Result<Option<SecretBackend>>;

    async fn list(&self) -> Result<Vec<SecretBackend>>;

    /// Replace name, config and rotation fields; `NotFound` if absent
    async fn update(&self, backend: &SecretBackend) -> Result<SecretBackend>;

    /// Delete a backend. Unless `force`, fails with `Conflict` when any
    /// revision references it. The count and the delete share a transaction.
    async fn delete(&self, id: &BackendId, force: bool) -> Result<DeletedBackend>;

    /// Number of revisions whose content lives in the backend
    async fn count_references(&self, id: &BackendId) -> Result<i64>;

    /// Reference counts for every backend with at least one reference
    async fn count_all_references(&self) -> Result<HashMap<BackendId, i64>>;

    /// Backends with a rotation interval and their next trigger time
    async fn rotation_schedule(&self) -> Result<Vec<RotationChange>>;
}

#[derive(Debug, Clone)]
pub struct SqlxSecretBackendRepository {
    pool: DbPool,
}

impl SqlxSecretBackendRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn config_json(backend: &SecretBackend) -> Result<String> {
    serde_json::to_string(&backend.config).map_err(|e| SecretplaneError::Serialization {
        source: e,
        context: format!("Failed to serialize config for secret backend '{}'", backend.name),
    })
}

fn map_write_error(e: sqlx::Error, backend: &SecretBackend, action: &str) -> SecretplaneError {
    if is_unique_violation(&e) {
        return SecretplaneError::already_exists("secret backend", backend.name.clone());
    }
    tracing::error!(error = %e, backend = %backend.name, "Failed to {} secret backend", action);
    SecretplaneError::database(e, format!("Failed to {} secret backend '{}'", action, backend.name))
}

#[async_trait]
impl SecretBackendRepository for SqlxSecretBackendRepository {
    #[instrument(skip(self, backend), fields(backend_name = %backend.name), name = "db_create_secret_backend")]
    async fn create(&self, backend: &SecretBackend) -> Result<SecretBackend> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, SecretBackendRow>(
            "INSERT INTO secret_backends (id, name, backend_type, config, token_rotate_interval_secs, next_rotate_time, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id, name, backend_type, config, token_rotate_interval_secs, next_rotate_time",
        )
        .bind(backend.id.as_str())
        .bind(&backend.name)
        .bind(&backend.backend_type)
        .bind(config_json(backend)?)
        .bind(backend.token_rotate_interval.map(|d| d.as_secs() as i64))
        .bind(backend.next_rotate_time)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, backend, "create"))?;

        row.try_into()
    }

    #[instrument(skip(self), fields(backend_id = %id), name = "db_get_secret_backend")]
    async fn get(&self, id: &BackendId) -> Result<Option<SecretBackend>> {
        let row = sqlx::query_as::<_, SecretBackendRow>(
            "SELECT id, name, backend_type, config, token_rotate_interval_secs, next_rotate_time \
             FROM secret_backends WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SecretplaneError::database(e, format!("Failed to fetch secret backend {}", id)))?;

        row.map(|r| r.try_into()).transpose()
    }

    #[instrument(skip(self), fields(backend_name = %name), name = "db_get_secret_backend_by_name")]
    async fn get_by_name(&self, name: &str) -> Result<Option<SecretBackend>> {
        let row = sqlx::query_as::<_, SecretBackendRow>(
            "SELECT id, name, backend_type, config, token_rotate_interval_secs, next_rotate_time \
             FROM secret_backends WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            SecretplaneError::database(e, format!("Failed to fetch secret backend '{}'", name))
        })?;

        row.map(|r| r.try_into()).transpose()
    }

    #[instrument(skip(self), name = "db_list_secret_backends")]
    async fn list(&self) -> Result<Vec<SecretBackend>> {
        let rows = sqlx::query_as::<_, SecretBackendRow>(
            "SELECT id, name, backend_type, config, token_rotate_interval_secs, next_rotate_time \
             FROM secret_backends ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SecretplaneError::database(e, "Failed to list secret backends"))?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    #[instrument(skip(self, backend), fields(backend_id = %backend.id), name = "db_update_secret_backend")]
    async fn update(&self, backend: &SecretBackend) -> Result<SecretBackend> {
        let row = sqlx::query_as::<_, SecretBackendRow>(
            "UPDATE secret_backends SET name = $2, config = $3, token_rotate_interval_secs = $4, \
             next_rotate_time = $5, updated_at = $6 WHERE id = $1 \
             RETURNING id, name, backend_type, config, token_rotate_interval_secs, next_rotate_time",
        )
        .bind(backend.id.as_str())
        .bind(&backend.name)
        .bind(config_json(backend)?)
        .bind(backend.token_rotate_interval.map(|d| d.as_secs() as i64))
        .bind(backend.next_rotate_time)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_write_error(e, backend, "update"))?;

        match row {
            Some(row) => row.try_into(),
            None => Err(SecretplaneError::not_found("secret backend", backend.id.as_str())),
        }
    }

    #[instrument(skip(self), fields(backend_id = %id, force = %force), name = "db_delete_secret_backend")]
    async fn delete(&self, id: &BackendId, force: bool) -> Result<DeletedBackend> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SecretplaneError::database(e, "Failed to begin backend delete"))?;

        let row = sqlx::query_as::<_, SecretBackendRow>(
            "SELECT id, name, backend_type, config, token_rotate_interval_secs, next_rotate_time \
             FROM secret_backends WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| SecretplaneError::database(e, format!("Failed to fetch secret backend {}", id)))?
        .ok_or_else(|| SecretplaneError::not_found("secret backend", id.as_str()))?;

        let references: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM secret_revisions WHERE backend_id = $1")
                .bind(id.as_str())
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    SecretplaneError::database(e, format!("Failed to count references to {}", id))
                })?;

        if references > 0 && !force {
            return Err(SecretplaneError::conflict(
                format!(
                    "backend {:?} still contains {} secret revision(s)",
                    row.name, references
                ),
                "secret backend",
            ));
        }

        sqlx::query("DELETE FROM secret_backends WHERE id = $1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| SecretplaneError::database(e, format!("Failed to delete secret backend {}", id)))?;

        tx.commit()
            .await
            .map_err(|e| SecretplaneError::database(e, "Failed to commit backend delete"))?;

        Ok(DeletedBackend { backend: row.try_into()?, references })
    }

    #[instrument(skip(self), fields(backend_id = %id), name = "db_count_backend_references")]
    async fn count_references(&self, id: &BackendId) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM secret_revisions WHERE backend_id = $1")
            .bind(id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SecretplaneError::database(e, format!("Failed to count references to {}", id)))
    }

    #[instrument(skip(self), name = "db_count_all_backend_references")]
    async fn count_all_references(&self) -> Result<HashMap<BackendId, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT backend_id, COUNT(*) FROM secret_revisions \
             WHERE backend_id IS NOT NULL GROUP BY backend_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SecretplaneError::database(e, "Failed to count backend references"))?;

        Ok(rows.into_iter().map(|(id, count)| (BackendId::from_string(id), count)).collect())
    }

    #[instrument(skip(self), name = "db_backend_rotation_schedule")]
    async fn rotation_schedule(&self) -> Result<Vec<RotationChange>> {
        let rows: Vec<(String, String, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT id, name, next_rotate_time FROM secret_backends \
             WHERE token_rotate_interval_secs IS NOT NULL ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SecretplaneError::database(e, "Failed to read backend rotation schedule"))?;

        Ok(rows
            .into_iter()
            .map(|(id, name, next_trigger_time)| RotationChange {
                id: BackendId::from_string(id),
                name,
                next_trigger_time,
            })
            .collect())
    }
}
