//! Secret access grant repository
//!
//! One row per (secret, subject, scope). Granting again overwrites the role.

use crate::domain::{SecretAccessGrant, SecretUri, Tag};
use crate::errors::{Result, SecretplaneError};
use crate::storage::DbPool;
use async_trait::async_trait;
use sqlx::FromRow;
use tracing::instrument;

#[derive(Debug, Clone, FromRow)]
struct GrantRow {
    pub uri: String,
    pub subject_tag: String,
    pub scope_tag: String,
    pub role: String,
}

impl TryFrom<GrantRow> for SecretAccessGrant {
    type Error = SecretplaneError;

    fn try_from(row: GrantRow) -> Result<Self> {
        Ok(SecretAccessGrant {
            uri: row.uri.parse()?,
            subject: row.subject_tag.parse()?,
            scope: row.scope_tag.parse()?,
            role: row.role.parse()?,
        })
    }
}

#[async_trait]
pub trait SecretGrantRepository: Send + Sync {
    /// Insert or overwrite the grant for (uri, subject, scope)
    async fn upsert(&self, grant: &SecretAccessGrant) -> Result<()>;

    /// Remove the grant; returns whether one existed
    async fn delete(&self, uri: &SecretUri, subject: &Tag, scope: &Tag) -> Result<bool>;


    async fn list_for_secret(&self, uri: &SecretUri) -> Result<Vec<SecretAccessGrant>>;

    /// Grants of the secret whose subject is any of `subjects`
    async fn list_for_subjects(
        &self,
        uri: &SecretUri,
        subjects: &[Tag],
    ) -> Result<Vec<SecretAccessGrant>>;
}

#[derive(Debug, Clone)]
pub struct SqlxSecretGrantRepository {
    pool: DbPool,
}

impl SqlxSecretGrantRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SecretGrantRepository for SqlxSecretGrantRepository {
    #[instrument(skip(self, grant), fields(uri = %grant.uri, subject = %grant.subject, scope = %grant.scope, role = %grant.role), name = "db_upsert_secret_grant")]
    async fn upsert(&self, grant: &SecretAccessGrant) -> Result<()> {
        sqlx::query(
            "INSERT INTO secret_grants (uri, subject_tag, scope_tag, role) VALUES ($1, $2, $3, $4) \
             ON CONFLICT(uri, subject_tag, scope_tag) DO UPDATE SET role = excluded.role",
        )
        .bind(grant.uri.short())
        .bind(grant.subject.to_string())
        .bind(grant.scope.to_string())
        .bind(grant.role.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            SecretplaneError::database(e, format!("Failed to grant access to {}", grant.uri))
        })?;
        Ok(())
    }

    #[instrument(skip(self), fields(uri = %uri, subject = %subject, scope = %scope), name = "db_delete_secret_grant")]
    async fn delete(&self, uri: &SecretUri, subject: &Tag, scope: &Tag) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM secret_grants WHERE uri = $1 AND subject_tag = $2 AND scope_tag = $3",
        )
        .bind(uri.short())
        .bind(subject.to_string())
        .bind(scope.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| SecretplaneError::database(e, format!("Failed to revoke access to {}", uri)))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(uri = %uri), name = "db_list_secret_grants")]
    async fn list_for_secret(&self, uri: &SecretUri) -> Result<Vec<SecretAccessGrant>> {
        let rows = sqlx::query_as::<_, GrantRow>(
            "SELECT uri, subject_tag, scope_tag, role FROM secret_grants WHERE uri = $1 \
             ORDER BY subject_tag, scope_tag",
        )
        .bind(uri.short())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SecretplaneError::database(e, format!("Failed to list grants of {}", uri)))?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    #[instrument(skip(self, subjects), fields(uri = %uri, subjects = subjects.len()), name = "db_list_secret_grants_for_subjects")]
    async fn list_for_subjects(
        &self,
        uri: &SecretUri,
        subjects: &[Tag],
    ) -> Result<Vec<SecretAccessGrant>> {
        Ok(self
            .list_for_secret(uri)
            .await?
            .into_iter()
            .filter(|grant| subjects.contains(&grant.subject))
            .collect())
    }
}
