//! Secret access control
//!
//! Grants are stored per (secret, subject, scope) and overwrite rather than
//! stack. The role a consumer holds combines ownership of the secret with
//! every grant whose subject and scope apply to it.

use crate::domain::{AccessParams, Role, SecretAccessGrant, SecretMetadata, SecretUri, Tag, TagKind};
use crate::errors::{Result, SecretplaneError};
use crate::storage::{SecretGrantRepository, SecretRepository};
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[derive(Clone)]
pub struct AccessControlEvaluator {
    secrets: Arc<dyn SecretRepository>,
    grants: Arc<dyn SecretGrantRepository>,
}

impl std::fmt::Debug for AccessControlEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessControlEvaluator").finish_non_exhaustive()
    }
}

/// The subject itself plus, for a unit, its application
fn subject_candidates(subject: &Tag) -> Vec<Tag> {
    let mut subjects = vec![subject.clone()];
    if subject.kind() == TagKind::Unit {
        if let Some(app) = subject.application_name() {
            subjects.push(Tag::application(app));
        }
    }
    subjects
}

/// Whether a grant's scope covers the consumer
fn scope_applies(scope: &Tag, consumer: &Tag) -> bool {
    match scope.kind() {
        TagKind::Application | TagKind::Model => true,
        TagKind::Relation => consumer
            .application_name()
            .map(|app| scope.relation_applications().contains(&app))
            .unwrap_or(false),
        TagKind::Unit => false,
    }
}

/// Role implied by ownership alone
fn owner_role(metadata: &SecretMetadata, consumer: &Tag, is_leader: bool) -> Role {
    if &metadata.owner == consumer {
        return Role::Manage;
    }
    match (&metadata.owner, consumer.kind()) {
        (Tag::Application(app), TagKind::Unit) if consumer.application_name() == Some(app.as_str()) => {
            if is_leader {
                Role::Manage
            } else {
                Role::View
            }
        }
        _ => Role::None,
    }
}

impl AccessControlEvaluator {
    pub fn new(secrets: Arc<dyn SecretRepository>, grants: Arc<dyn SecretGrantRepository>) -> Self {
        Self { secrets, grants }
    }

    async fn secret(&self, uri: &SecretUri) -> Result<SecretMetadata> {
        self.secrets
            .get_secret(uri)
            .await?
            .ok_or_else(|| SecretplaneError::not_found("secret", uri.to_string()))
    }

    /// Grant `role` to (subject, scope), replacing any existing role
    #[instrument(skip(self), fields(uri = %uri, subject = %params.subject, scope = %params.scope, role = %role), name = "grant_secret_access")]
    pub async fn grant_secret_access(
        &self,
        uri: &SecretUri,
        params: &AccessParams,
        role: Role,
    ) -> Result<()> {
        params.validate()?;
        if role == Role::None {
            return Err(SecretplaneError::not_valid_field(
                "cannot grant role \"none\", revoke access instead",
                "role",
            ));
        }
        self.secret(uri).await?;

        self.grants
            .upsert(&SecretAccessGrant {
                uri: uri.clone(),
                subject: params.subject.clone(),
                scope: params.scope.clone(),
                role,
            })
            .await?;
        info!("Granted secret access");
        Ok(())
    }

    /// Remove the grant for exactly (subject, scope). Missing grants are fine.
    #[instrument(skip(self), fields(uri = %uri, subject = %params.subject, scope = %params.scope), name = "revoke_secret_access")]
    pub async fn revoke_secret_access(&self, uri: &SecretUri, params: &AccessParams) -> Result<()> {
        params.validate()?;
        self.secret(uri).await?;

        if self.grants.delete(uri, &params.subject, &params.scope).await? {
            info!("Revoked secret access");
        } else {
            debug!("No grant to revoke");
        }
        Ok(())
    }

    /// Highest role granted within `scope` to the subject or, for a unit,
    /// to its application. `none` when nothing matches.
    pub async fn get_secret_access(&self, uri: &SecretUri, params: &AccessParams) -> Result<Role> {
        params.validate()?;
        let subjects = subject_candidates(&params.subject);
        let grants = self.grants.list_for_subjects(uri, &subjects).await?;

        Ok(grants
            .into_iter()
            .filter(|grant| grant.scope == params.scope)
            .map(|grant| grant.role)
            .max()
            .unwrap_or_default())
    }

    /// Grants holding at least `min_role`
    pub async fn get_secret_grants(
        &self,
        uri: &SecretUri,
        min_role: Role,
    ) -> Result<Vec<SecretAccessGrant>> {
        Ok(self
            .grants
            .list_for_secret(uri)
            .await?
            .into_iter()
            .filter(|grant| grant.role >= min_role)
            .collect())
    }

    /// Role a consumer holds on a secret: ownership combined with every
    /// grant whose subject and scope apply to the consumer.
    #[instrument(skip(self), fields(uri = %uri, consumer = %consumer, is_leader = %is_leader), name = "effective_secret_role")]
    pub async fn effective_role(
        &self,
        uri: &SecretUri,
        consumer: &Tag,
        is_leader: bool,
    ) -> Result<Role> {
        let metadata = self.secret(uri).await?;
        let owned = owner_role(&metadata, consumer, is_leader);
        if owned == Role::Manage {
            return Ok(owned);
        }

        let mut subjects = subject_candidates(consumer);
        subjects.push(Tag::model(metadata.model_uuid.clone()));
        let granted = self
            .grants
            .list_for_subjects(uri, &subjects)
            .await?
            .into_iter()
            .filter(|grant| scope_applies(&grant.scope, consumer))
            .map(|grant| grant.role)
            .max()
            .unwrap_or_default();

        Ok(owned.max(granted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_candidates() {
        let unit = Tag::unit("wordpress/0");
        assert_eq!(subject_candidates(&unit), vec![unit.clone(), Tag::application("wordpress")]);

        let app = Tag::application("mysql");
        assert_eq!(subject_candidates(&app), vec![app.clone()]);
    }

    #[test]
    fn test_relation_scope_applies_to_endpoints_only() {
        let relation = Tag::relation("wordpress:db mysql:server");
        assert!(scope_applies(&relation, &Tag::unit("wordpress/1")));
        assert!(scope_applies(&relation, &Tag::application("mysql")));
        assert!(!scope_applies(&relation, &Tag::unit("mediawiki/0")));
        assert!(!scope_applies(&relation, &Tag::model("8c3b5b5a-0f2a-4cfd-9a6f-8d1f8e1d9a11")));
    }

    #[test]
    fn test_application_and_model_scopes_always_apply() {
        let consumer = Tag::unit("wordpress/0");
        assert!(scope_applies(&Tag::application("mysql"), &consumer));
        assert!(scope_applies(&Tag::model("8c3b5b5a-0f2a-4cfd-9a6f-8d1f8e1d9a11"), &consumer));
    }
}
