//! Secret repository
//!
//! Secret metadata and revisions. A revision row holds either inline data or
//! a backend reference; the table's CHECK constraint and the
//! [`RevisionContent`] sum type both enforce that exactly one is present.
//! The only mutation of revision content is
//! [`SecretRepository::change_revision_backend`], a compare-and-swap on the
//! previous reference.

use super::is_unique_violation;
use crate::domain::{
    BackendId, CreateSecretParams, RevisionContent, SecretMetadata, SecretRevision, SecretUri,
    Tag, ValueRef,
};
use crate::errors::{Result, SecretplaneError};
use crate::secrets::types::SecretValue;
use crate::storage::DbPool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::collections::BTreeMap;
use tracing::instrument;

#[derive(Debug, Clone, FromRow)]
struct SecretRow {
    pub uri: String,
    pub model_uuid: String,
    pub owner_tag: String,
    pub label: Option<String>,
    pub rotate_policy: String,
    pub auto_prune: bool,
    pub description: Option<String>,
    pub latest_revision: i64,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl TryFrom<SecretRow> for SecretMetadata {
    type Error = SecretplaneError;

    fn try_from(row: SecretRow) -> Result<Self> {
        Ok(SecretMetadata {
            uri: row.uri.parse()?,
            model_uuid: row.model_uuid,
            owner: row.owner_tag.parse()?,
            label: row.label,
            rotate_policy: row.rotate_policy.parse()?,
            auto_prune: row.auto_prune,
            description: row.description,
            latest_revision: row.latest_revision,
            create_time: row.create_time,
            update_time: row.update_time,
        })
    }
}

#[derive(FromRow)]
struct RevisionRow {
    pub uri: String,
    pub revision: i64,
    pub obsolete: bool,
    pub pending_delete: bool,
    pub create_time: DateTime<Utc>,
    pub expire_time: Option<DateTime<Utc>>,
    pub inline_data: Option<String>,
    pub backend_id: Option<String>,
    pub revision_id: Option<String>,
}

impl TryFrom<RevisionRow> for SecretRevision {
    type Error = SecretplaneError;

    fn try_from(row: RevisionRow) -> Result<Self> {
        let content = match (row.inline_data, row.backend_id, row.revision_id) {
            (Some(data), None, None) => {
                let data: BTreeMap<String, String> =
                    serde_json::from_str(&data).map_err(|e| SecretplaneError::Serialization {
                        source: e,
                        context: format!("Invalid inline content for {} revision {}", row.uri, row.revision),
                    })?;
                RevisionContent::Inline(SecretValue::from_stored(data))
            }
            (None, Some(backend_id), Some(revision_id)) => {
                RevisionContent::External(ValueRef::new(BackendId::from_string(backend_id), revision_id))
            }
            _ => {
                return Err(SecretplaneError::internal(format!(
                    "revision {} of {} has inconsistent content columns",
                    row.revision, row.uri
                )))
            }
        };

        Ok(SecretRevision {
            uri: row.uri.parse()?,
            revision: row.revision,
            obsolete: row.obsolete,
            pending_delete: row.pending_delete,
            create_time: row.create_time,
            expire_time: row.expire_time,
            content,
        })
    }
}

/// A revision whose content is held by a particular backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendReference {
    pub uri: SecretUri,
    pub revision: i64,
    pub value_ref: ValueRef,
}

#[async_trait]
pub trait SecretRepository: Send + Sync {
    /// Create a secret with revision 1
    async fn create_secret(&self, params: CreateSecretParams) -> Result<SecretMetadata>;

    /// Append a revision, returning it
    async fn add_revision(
        &self,
        uri: &SecretUri,
        content: RevisionContent,
        expire_time: Option<DateTime<Utc>>,
    ) -> Result<SecretRevision>;

    async fn get_secret(&self, uri: &SecretUri) -> Result<Option<SecretMetadata>>;

    async fn get_revision(&self, uri: &SecretUri, revision: i64) -> Result<Option<SecretRevision>>;

    /// All revisions of a secret, oldest first
    async fn list_revisions(&self, uri: &SecretUri) -> Result<Vec<SecretRevision>>;

    /// Secrets of the model owned by `owner`
    async fn list_owned(&self, model_uuid: &str, owner: &Tag) -> Result<Vec<SecretMetadata>>;

    /// Owners in the model with at least one externally stored revision not
    /// held by `active_backend`
    async fn owners_needing_migration(
        &self,
        model_uuid: &str,
        active_backend: &BackendId,
    ) -> Result<Vec<Tag>>;

    /// Switch a revision's reference from `from` to `to`. `Conflict` when the
    /// stored reference is no longer `from`, `NotFound` when the revision is gone.
    async fn change_revision_backend(
        &self,
        uri: &SecretUri,
        revision: i64,
        from: &ValueRef,
        to: &ValueRef,
    ) -> Result<()>;

    /// Every revision whose content lives in the backend
    async fn list_backend_references(&self, backend_id: &BackendId) -> Result<Vec<BackendReference>>;
}

#[derive(Debug, Clone)]
pub struct SqlxSecretRepository {
    pool: DbPool,
}

impl SqlxSecretRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SECRET_COLUMNS: &str = "uri, model_uuid, owner_tag, label, rotate_policy, auto_prune, \
    description, latest_revision, create_time, update_time";

const REVISION_COLUMNS: &str = "uri, revision, obsolete, pending_delete, create_time, \
    expire_time, inline_data, backend_id, revision_id";

/// Column values for revision content: (inline_data, backend_id, revision_id)
fn content_columns(
    content: &RevisionContent,
) -> Result<(Option<String>, Option<String>, Option<String>)> {
    match content {
        RevisionContent::Inline(value) => {
            value.validate()?;
            let data = serde_json::to_string(value.expose()).map_err(|e| {
                SecretplaneError::Serialization { source: e, context: "Failed to encode inline content".into() }
            })?;
            Ok((Some(data), None, None))
        }
        RevisionContent::External(value_ref) => Ok((
            None,
            Some(value_ref.backend_id.as_str().to_string()),
            Some(value_ref.revision_id.clone()),
        )),
    }
}

#[async_trait]
impl SecretRepository for SqlxSecretRepository {
    #[instrument(skip(self, params), fields(uri = %params.uri, owner = %params.owner), name = "db_create_secret")]
    async fn create_secret(&self, params: CreateSecretParams) -> Result<SecretMetadata> {
        SecretMetadata::validate_owner(&params.owner)?;
        let (inline_data, backend_id, revision_id) = content_columns(&params.content)?;
        let now = Utc::now();
        let uri = params.uri.short();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SecretplaneError::database(e, "Failed to begin secret create"))?;

        let row = sqlx::query_as::<_, SecretRow>(&format!(
            "INSERT INTO secrets ({SECRET_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, 1, $8, $8) \
             RETURNING {SECRET_COLUMNS}"
        ))
        .bind(&uri)
        .bind(&params.model_uuid)
        .bind(params.owner.to_string())
        .bind(&params.label)
        .bind(params.rotate_policy.as_str())
        .bind(params.auto_prune)
        .bind(&params.description)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                SecretplaneError::already_exists("secret", uri.clone())
            } else {
                SecretplaneError::database(e, format!("Failed to create secret {}", uri))
            }
        })?;

        sqlx::query(
            "INSERT INTO secret_revisions (uri, revision, create_time, expire_time, inline_data, backend_id, revision_id) \
             VALUES ($1, 1, $2, $3, $4, $5, $6)",
        )
        .bind(&uri)
        .bind(now)
        .bind(params.expire_time)
        .bind(inline_data)
        .bind(backend_id)
        .bind(revision_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| SecretplaneError::database(e, format!("Failed to create revision 1 of {}", uri)))?;

        tx.commit()
            .await
            .map_err(|e| SecretplaneError::database(e, "Failed to commit secret create"))?;

        row.try_into()
    }

    #[instrument(skip(self, content), fields(uri = %uri), name = "db_add_secret_revision")]
    async fn add_revision(
        &self,
        uri: &SecretUri,
        content: RevisionContent,
        expire_time: Option<DateTime<Utc>>,
    ) -> Result<SecretRevision> {
        let (inline_data, backend_id, revision_id) = content_columns(&content)?;
        let key = uri.short();
        let now = Utc::now();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SecretplaneError::database(e, "Failed to begin revision create"))?;

        let revision: i64 = sqlx::query_scalar(
            "UPDATE secrets SET latest_revision = latest_revision + 1, update_time = $2 \
             WHERE uri = $1 RETURNING latest_revision",
        )
        .bind(&key)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| SecretplaneError::database(e, format!("Failed to bump revision of {}", key)))?
        .ok_or_else(|| SecretplaneError::not_found("secret", key.clone()))?;

        let row = sqlx::query_as::<_, RevisionRow>(&format!(
            "INSERT INTO secret_revisions (uri, revision, create_time, expire_time, inline_data, backend_id, revision_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {REVISION_COLUMNS}"
        ))
        .bind(&key)
        .bind(revision)
        .bind(now)
        .bind(expire_time)
        .bind(inline_data)
        .bind(backend_id)
        .bind(revision_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            SecretplaneError::database(e, format!("Failed to create revision {} of {}", revision, key))
        })?;

        tx.commit()
            .await
            .map_err(|e| SecretplaneError::database(e, "Failed to commit revision create"))?;

        row.try_into()
    }

    #[instrument(skip(self), fields(uri = %uri), name = "db_get_secret")]
    async fn get_secret(&self, uri: &SecretUri) -> Result<Option<SecretMetadata>> {
        let row = sqlx::query_as::<_, SecretRow>(&format!(
            "SELECT {SECRET_COLUMNS} FROM secrets WHERE uri = $1"
        ))
        .bind(uri.short())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SecretplaneError::database(e, format!("Failed to fetch secret {}", uri)))?;

        row.map(|r| r.try_into()).transpose()
    }

    #[instrument(skip(self), fields(uri = %uri, revision = %revision), name = "db_get_secret_revision")]
    async fn get_revision(&self, uri: &SecretUri, revision: i64) -> Result<Option<SecretRevision>> {
        let row = sqlx::query_as::<_, RevisionRow>(&format!(
            "SELECT {REVISION_COLUMNS} FROM secret_revisions WHERE uri = $1 AND revision = $2"
        ))
        .bind(uri.short())
        .bind(revision)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            SecretplaneError::database(e, format!("Failed to fetch revision {} of {}", revision, uri))
        })?;

        row.map(|r| r.try_into()).transpose()
    }

    #[instrument(skip(self), fields(uri = %uri), name = "db_list_secret_revisions")]
    async fn list_revisions(&self, uri: &SecretUri) -> Result<Vec<SecretRevision>> {
        let rows = sqlx::query_as::<_, RevisionRow>(&format!(
            "SELECT {REVISION_COLUMNS} FROM secret_revisions WHERE uri = $1 ORDER BY revision"
        ))
        .bind(uri.short())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SecretplaneError::database(e, format!("Failed to list revisions of {}", uri)))?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    #[instrument(skip(self), fields(model_uuid = %model_uuid, owner = %owner), name = "db_list_owned_secrets")]
    async fn list_owned(&self, model_uuid: &str, owner: &Tag) -> Result<Vec<SecretMetadata>> {
        let rows = sqlx::query_as::<_, SecretRow>(&format!(
            "SELECT {SECRET_COLUMNS} FROM secrets WHERE model_uuid = $1 AND owner_tag = $2 ORDER BY uri"
        ))
        .bind(model_uuid)
        .bind(owner.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SecretplaneError::database(e, format!("Failed to list secrets owned by {}", owner)))?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    #[instrument(skip(self), fields(model_uuid = %model_uuid, active_backend = %active_backend), name = "db_owners_needing_migration")]
    async fn owners_needing_migration(
        &self,
        model_uuid: &str,
        active_backend: &BackendId,
    ) -> Result<Vec<Tag>> {
        let owners: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT s.owner_tag FROM secrets s \
             JOIN secret_revisions r ON r.uri = s.uri \
             WHERE s.model_uuid = $1 AND r.backend_id IS NOT NULL AND r.backend_id != $2 \
             ORDER BY s.owner_tag",
        )
        .bind(model_uuid)
        .bind(active_backend.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SecretplaneError::database(e, "Failed to find secret owners to migrate"))?;

        owners.iter().map(|owner| owner.parse()).collect()
    }

    #[instrument(skip(self), fields(uri = %uri, revision = %revision, from = %from, to = %to), name = "db_change_revision_backend")]
    async fn change_revision_backend(
        &self,
        uri: &SecretUri,
        revision: i64,
        from: &ValueRef,
        to: &ValueRef,
    ) -> Result<()> {
        let key = uri.short();
        let result = sqlx::query(
            "UPDATE secret_revisions SET backend_id = $5, revision_id = $6 \
             WHERE uri = $1 AND revision = $2 AND backend_id = $3 AND revision_id = $4",
        )
        .bind(&key)
        .bind(revision)
        .bind(from.backend_id.as_str())
        .bind(&from.revision_id)
        .bind(to.backend_id.as_str())
        .bind(&to.revision_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            SecretplaneError::database(e, format!("Failed to switch backend of {} revision {}", key, revision))
        })?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.get_revision(uri, revision).await? {
            None => Err(SecretplaneError::not_found(
                "secret revision",
                format!("{}/{}", key, revision),
            )),
            Some(_) => Err(SecretplaneError::conflict(
                format!("content of {} revision {} changed during migration", key, revision),
                "secret revision",
            )),
        }
    }

    #[instrument(skip(self), fields(backend_id = %backend_id), name = "db_list_backend_references")]
    async fn list_backend_references(&self, backend_id: &BackendId) -> Result<Vec<BackendReference>> {
        let rows: Vec<(String, i64, String)> = sqlx::query_as(
            "SELECT uri, revision, revision_id FROM secret_revisions WHERE backend_id = $1 ORDER BY uri, revision",
        )
        .bind(backend_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SecretplaneError::database(e, format!("Failed to list references to {}", backend_id)))?;

        rows.into_iter()
            .map(|(uri, revision, revision_id)| {
                Ok(BackendReference {
                    uri: uri.parse()?,
                    revision,
                    value_ref: ValueRef::new(backend_id.clone(), revision_id),
                })
            })
            .collect()
    }
}
