//! Content store of the built-in controller backend

use crate::domain::{BackendId, SecretUri};
use crate::errors::{Result, SecretplaneError};
use crate::secrets::types::SecretValue;
use crate::storage::DbPool;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::instrument;

#[async_trait]
pub trait InternalContentRepository: Send + Sync {
    async fn insert(
        &self,
        revision_id: &str,
        backend_id: &BackendId,
        uri: &SecretUri,
        revision: i64,
        value: &SecretValue,
    ) -> Result<()>;

    async fn get(&self, revision_id: &str) -> Result<Option<SecretValue>>;

    /// Returns whether content existed
    async fn delete(&self, revision_id: &str) -> Result<bool>;

    /// Number of content rows stored for the backend
    async fn count_for_backend(&self, backend_id: &BackendId) -> Result<i64>;
}

#[derive(Debug, Clone)]
pub struct SqlxInternalContentRepository {
    pool: DbPool,
}

impl SqlxInternalContentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InternalContentRepository for SqlxInternalContentRepository {
    #[instrument(skip(self, value), fields(revision_id = %revision_id, uri = %uri, revision = %revision), name = "db_insert_internal_content")]
    async fn insert(
        &self,
        revision_id: &str,
        backend_id: &BackendId,
        uri: &SecretUri,
        revision: i64,
        value: &SecretValue,
    ) -> Result<()> {
        let data = serde_json::to_string(value.expose()).map_err(|e| {
            SecretplaneError::Serialization { source: e, context: "Failed to encode secret content".into() }
        })?;

        sqlx::query(
            "INSERT INTO internal_secret_content (revision_id, backend_id, secret_uri, revision, data, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT(revision_id) DO UPDATE SET data = excluded.data",
        )
        .bind(revision_id)
        .bind(backend_id.as_str())
        .bind(uri.short())
        .bind(revision)
        .bind(data)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| SecretplaneError::database(e, format!("Failed to store content of {} revision {}", uri, revision)))?;
        Ok(())
    }

    #[instrument(skip(self), fields(revision_id = %revision_id), name = "db_get_internal_content")]
    async fn get(&self, revision_id: &str) -> Result<Option<SecretValue>> {
        let data: Option<String> =
            sqlx::query_scalar("SELECT data FROM internal_secret_content WHERE revision_id = $1")
                .bind(revision_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| SecretplaneError::database(e, "Failed to read secret content"))?;

        data.map(|data| {
            serde_json::from_str::<BTreeMap<String, String>>(&data)
                .map(SecretValue::from_stored)
                .map_err(|e| SecretplaneError::Serialization {
                    source: e,
                    context: format!("Invalid secret content stored under {}", revision_id),
                })
        })
        .transpose()
    }

    #[instrument(skip(self), fields(revision_id = %revision_id), name = "db_delete_internal_content")]
    async fn delete(&self, revision_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM internal_secret_content WHERE revision_id = $1")
            .bind(revision_id)
            .execute(&self.pool)
            .await
            .map_err(|e| SecretplaneError::database(e, "Failed to delete secret content"))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(backend_id = %backend_id), name = "db_count_internal_content")]
    async fn count_for_backend(&self, backend_id: &BackendId) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM internal_secret_content WHERE backend_id = $1")
            .bind(backend_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SecretplaneError::database(e, "Failed to count secret content"))
    }
}
