//! Secret access facade
//!
//! Grant and revoke calls are made by the entity holding the secret. The
//! caller must already hold `manage` on each secret it changes.

use super::auth::AuthContext;
use super::error::ErrorResults;
use crate::domain::{AccessParams, Role, SecretUri, Tag};
use crate::errors::{Result, SecretplaneError};
use crate::secrets::AccessControlEvaluator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{instrument, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrantRevokeSecretArg {
    pub uri: String,
    pub scope_tag: String,
    pub subject_tags: Vec<String>,
    /// Ignored on revoke
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrantRevokeSecretArgs {
    pub args: Vec<GrantRevokeSecretArg>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Grant,
    Revoke,
}

#[derive(Debug, Clone)]
pub struct SecretAccessApi {
    evaluator: Arc<AccessControlEvaluator>,
}

impl SecretAccessApi {
    pub fn new(evaluator: Arc<AccessControlEvaluator>) -> Self {
        Self { evaluator }
    }

    #[instrument(skip(self, auth, args), fields(principal = %auth.principal, count = args.args.len()), name = "api_grant_secret_access")]
    pub async fn grant_secret_access(
        &self,
        auth: &AuthContext,
        args: GrantRevokeSecretArgs,
    ) -> Result<ErrorResults> {
        self.apply(auth, args, Change::Grant).await
    }

    #[instrument(skip(self, auth, args), fields(principal = %auth.principal, count = args.args.len()), name = "api_revoke_secret_access")]
    pub async fn revoke_secret_access(
        &self,
        auth: &AuthContext,
        args: GrantRevokeSecretArgs,
    ) -> Result<ErrorResults> {
        self.apply(auth, args, Change::Revoke).await
    }

    async fn apply(
        &self,
        auth: &AuthContext,
        args: GrantRevokeSecretArgs,
        change: Change,
    ) -> Result<ErrorResults> {
        let caller = auth.entity.clone().ok_or_else(|| {
            SecretplaneError::permission_denied(format!(
                "{} cannot change secret access",
                auth.principal
            ))
        })?;

        let mut results = Vec::with_capacity(args.args.len());
        for arg in args.args {
            let result = self.apply_one(&caller, auth.is_leader, arg, change).await;
            if let Err(e) = &result {
                warn!(caller = %caller, error = %e, "Secret access change rejected");
            }
            results.push(result.into());
        }
        Ok(ErrorResults { results })
    }

    async fn apply_one(
        &self,
        caller: &Tag,
        is_leader: bool,
        arg: GrantRevokeSecretArg,
        change: Change,
    ) -> Result<()> {
        let uri: SecretUri = arg.uri.parse()?;
        let scope: Tag = arg.scope_tag.parse()?;
        let role = match change {
            Change::Grant => arg.role.parse::<Role>()?,
            Change::Revoke => Role::None,
        };
        let subjects = arg
            .subject_tags
            .iter()
            .map(|s| s.parse::<Tag>())
            .collect::<Result<Vec<_>>>()?;
        if subjects.is_empty() {
            return Err(SecretplaneError::not_valid_field("no subjects given", "subject_tags"));
        }

        let held = self.evaluator.effective_role(&uri, caller, is_leader).await?;
        if !held.allows(Role::Manage) {
            return Err(SecretplaneError::permission_denied(format!(
                "{} does not manage {}",
                caller, uri
            )));
        }

        for subject in subjects {
            let params = AccessParams::new(subject, scope.clone());
            match change {
                Change::Grant => self.evaluator.grant_secret_access(&uri, &params, role).await?,
                Change::Revoke => self.evaluator.revoke_secret_access(&uri, &params).await?,
            }
        }
        Ok(())
    }
}
