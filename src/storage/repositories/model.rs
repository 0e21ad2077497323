//! Model repository
//!
//! Stores models and their `secret-backend` model-config value. Changing
//! that value publishes a model-config notification once committed.

use crate::domain::{Model, ModelType, ModelUuid};
use crate::errors::{Result, SecretplaneError};
use crate::runtime::Notifier;
use crate::storage::DbPool;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::FromRow;
use tracing::instrument;

#[derive(Debug, Clone, FromRow)]
struct ModelRow {
    pub uuid: String,
    pub name: String,
    pub model_type: String,
    pub cloud: String,
    pub cloud_credential: Option<String>,
    pub secret_backend: String,
}

impl TryFrom<ModelRow> for Model {
    type Error = SecretplaneError;

    fn try_from(row: ModelRow) -> Result<Self> {
        let model_type: ModelType = row.model_type.parse()?;
        Ok(Model {
            uuid: ModelUuid::from_string(row.uuid),
            name: row.name,
            model_type,
            cloud: row.cloud,
            cloud_credential: row.cloud_credential,
            secret_backend: row.secret_backend,
        })
    }
}

#[async_trait]
pub trait ModelRepository: Send + Sync {
    /// Insert or replace a model record
    async fn upsert(&self, model: &Model) -> Result<Model>;

    async fn get(&self, uuid: &str) -> Result<Option<Model>>;

    async fn list(&self) -> Result<Vec<Model>>;

    /// Set the model-config `secret-backend` value and notify watchers
    async fn set_secret_backend(&self, uuid: &str, value: &str) -> Result<Model>;

    /// Models whose config names the backend
    async fn list_using_backend(&self, backend_name: &str) -> Result<Vec<Model>>;
}

#[derive(Debug, Clone)]
pub struct SqlxModelRepository {
    pool: DbPool,
    notifier: Notifier,
}

impl SqlxModelRepository {
    pub fn new(pool: DbPool, notifier: Notifier) -> Self {
        Self { pool, notifier }
    }
}

const MODEL_COLUMNS: &str = "uuid, name, model_type, cloud, cloud_credential, secret_backend";

#[async_trait]
impl ModelRepository for SqlxModelRepository {
    #[instrument(skip(self, model), fields(model_uuid = %model.uuid, model_name = %model.name), name = "db_upsert_model")]
    async fn upsert(&self, model: &Model) -> Result<Model> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SecretplaneError::database(e, "Failed to begin model upsert"))?;

        let previous: Option<String> =
            sqlx::query_scalar("SELECT secret_backend FROM models WHERE uuid = $1")
                .bind(model.uuid.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| {
                    SecretplaneError::database(e, format!("Failed to fetch model {}", model.uuid))
                })?;

        let row = sqlx::query_as::<_, ModelRow>(&format!(
            "INSERT INTO models ({MODEL_COLUMNS}, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT(uuid) DO UPDATE SET name = excluded.name, model_type = excluded.model_type, \
             cloud = excluded.cloud, cloud_credential = excluded.cloud_credential, \
             secret_backend = excluded.secret_backend, updated_at = excluded.updated_at \
             RETURNING {MODEL_COLUMNS}"
        ))
        .bind(model.uuid.as_str())
        .bind(&model.name)
        .bind(model.model_type.as_str())
        .bind(&model.cloud)
        .bind(&model.cloud_credential)
        .bind(&model.secret_backend)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| SecretplaneError::database(e, format!("Failed to save model {}", model.uuid)))?;

        tx.commit()
            .await
            .map_err(|e| SecretplaneError::database(e, "Failed to commit model upsert"))?;

        let saved: Model = row.try_into()?;
        if previous.is_some_and(|previous| previous != saved.secret_backend) {
            self.notifier.model_config.publish(&saved.uuid.to_string(), ());
        }
        Ok(saved)
    }

    #[instrument(skip(self), fields(model_uuid = %uuid), name = "db_get_model")]
    async fn get(&self, uuid: &str) -> Result<Option<Model>> {
        let row = sqlx::query_as::<_, ModelRow>(&format!(
            "SELECT {MODEL_COLUMNS} FROM models WHERE uuid = $1"
        ))
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SecretplaneError::database(e, format!("Failed to fetch model {}", uuid)))?;

        row.map(|r| r.try_into()).transpose()
    }

    #[instrument(skip(self), name = "db_list_models")]
    async fn list(&self) -> Result<Vec<Model>> {
        let rows = sqlx::query_as::<_, ModelRow>(&format!(
            "SELECT {MODEL_COLUMNS} FROM models ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SecretplaneError::database(e, "Failed to list models"))?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    #[instrument(skip(self), fields(model_uuid = %uuid, secret_backend = %value), name = "db_set_model_secret_backend")]
    async fn set_secret_backend(&self, uuid: &str, value: &str) -> Result<Model> {
        let row = sqlx::query_as::<_, ModelRow>(&format!(
            "UPDATE models SET secret_backend = $2, updated_at = $3 WHERE uuid = $1 RETURNING {MODEL_COLUMNS}"
        ))
        .bind(uuid)
        .bind(value)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            SecretplaneError::database(e, format!("Failed to update secret backend of model {}", uuid))
        })?
        .ok_or_else(|| SecretplaneError::not_found("model", uuid))?;

        let model: Model = row.try_into()?;
        self.notifier.model_config.publish(&uuid.to_string(), ());
        Ok(model)
    }

    #[instrument(skip(self), fields(backend_name = %backend_name), name = "db_list_models_using_backend")]
    async fn list_using_backend(&self, backend_name: &str) -> Result<Vec<Model>> {
        let rows = sqlx::query_as::<_, ModelRow>(&format!(
            "SELECT {MODEL_COLUMNS} FROM models WHERE secret_backend = $1 ORDER BY name"
        ))
        .bind(backend_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SecretplaneError::database(e, "Failed to list models by secret backend"))?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }
}
