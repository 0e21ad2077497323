//! Secret backend administration facade

use super::auth::{require_controller_admin, AuthContext};
use super::error::ErrorResults;
use crate::domain::{
    BackendConfig, BackendFilter, CreateSecretBackendParams, SecretBackendInfo,
    UpdateSecretBackendParams,
};
use crate::errors::Result;
use crate::secrets::SecretBackendService;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddSecretBackendArg {
    #[serde(flatten)]
    pub backend: CreateSecretBackendParams,
    /// Skip the reachability check
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddSecretBackendArgs {
    pub args: Vec<AddSecretBackendArg>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSecretBackendArg {
    pub name: String,
    #[serde(default)]
    pub name_change: Option<String>,
    #[serde(default)]
    pub config: BackendConfig,
    /// Seconds; zero clears the interval
    #[serde(default)]
    pub token_rotate_interval: Option<u64>,
    /// Config keys to revert to their defaults
    #[serde(default)]
    pub reset: Vec<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSecretBackendArgs {
    pub args: Vec<UpdateSecretBackendArg>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoveSecretBackendArg {
    pub name: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoveSecretBackendArgs {
    pub args: Vec<RemoveSecretBackendArg>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListSecretBackendsArgs {
    /// Empty lists every backend
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub reveal: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListSecretBackendsResults {
    pub results: Vec<SecretBackendInfo>,
}

#[derive(Debug, Clone)]
pub struct SecretBackendsApi {
    service: Arc<SecretBackendService>,
}

impl SecretBackendsApi {
    pub fn new(service: Arc<SecretBackendService>) -> Self {
        Self { service }
    }

    #[instrument(skip(self, auth, args), fields(principal = %auth.principal, count = args.args.len()), name = "api_add_secret_backends")]
    pub async fn add_secret_backends(
        &self,
        auth: &AuthContext,
        args: AddSecretBackendArgs,
    ) -> Result<ErrorResults> {
        require_controller_admin(auth)?;
        let mut results = Vec::with_capacity(args.args.len());
        for arg in args.args {
            results.push(self.service.create_secret_backend(arg.backend, arg.force).await.into());
        }
        Ok(ErrorResults { results })
    }

    #[instrument(skip(self, auth, args), fields(principal = %auth.principal, count = args.args.len()), name = "api_update_secret_backends")]
    pub async fn update_secret_backends(
        &self,
        auth: &AuthContext,
        args: UpdateSecretBackendArgs,
    ) -> Result<ErrorResults> {
        require_controller_admin(auth)?;
        let mut results = Vec::with_capacity(args.args.len());
        for arg in args.args {
            results.push(self.update_one(arg).await.into());
        }
        Ok(ErrorResults { results })
    }

    async fn update_one(&self, arg: UpdateSecretBackendArg) -> Result<()> {
        let existing = self.service.get_secret_backend_by_name(&arg.name).await?;
        let params = UpdateSecretBackendParams {
            id: existing.id,
            name_change: arg.name_change,
            config: arg.config,
            token_rotate_interval: arg.token_rotate_interval.map(|secs| {
                if secs == 0 {
                    None
                } else {
                    Some(Duration::from_secs(secs))
                }
            }),
        };
        self.service.update_secret_backend(params, arg.force, &arg.reset).await?;
        Ok(())
    }

    #[instrument(skip(self, auth, args), fields(principal = %auth.principal, count = args.args.len()), name = "api_remove_secret_backends")]
    pub async fn remove_secret_backends(
        &self,
        auth: &AuthContext,
        args: RemoveSecretBackendArgs,
    ) -> Result<ErrorResults> {
        require_controller_admin(auth)?;
        let mut results = Vec::with_capacity(args.args.len());
        for arg in args.args {
            let removed = match self.service.get_secret_backend_by_name(&arg.name).await {
                Ok(backend) => self.service.delete_secret_backend(&backend.id, arg.force).await,
                Err(e) => Err(e),
            };
            results.push(removed.into());
        }
        Ok(ErrorResults { results })
    }

    /// List backends. Revealing config requires a controller administrator.
    #[instrument(skip(self, auth, args), fields(principal = %auth.principal, reveal = args.reveal), name = "api_list_secret_backends")]
    pub async fn list_secret_backends(
        &self,
        auth: &AuthContext,
        args: ListSecretBackendsArgs,
    ) -> Result<ListSecretBackendsResults> {
        if args.reveal {
            require_controller_admin(auth)?;
        }
        let filter = if args.names.is_empty() {
            BackendFilter::all()
        } else {
            BackendFilter::names(args.names)
        };
        let results = self.service.list_secret_backends(&filter, args.reveal).await?;
        Ok(ListSecretBackendsResults { results })
    }
}

