//! # Facades
//!
//! Request/response types and authorization checks for the calls the RPC
//! layer exposes. The transport and the authentication of callers live
//! outside this crate; each call receives an [`AuthContext`].

pub mod access;
pub mod auth;
pub mod backends;
pub mod error;
pub mod migration;

pub use access::{GrantRevokeSecretArg, GrantRevokeSecretArgs, SecretAccessApi};
pub use auth::{AuthContext, CONTROLLER_ADMIN_SCOPE, CONTROLLER_AGENT_SCOPE};
pub use backends::{
    AddSecretBackendArg, AddSecretBackendArgs, ListSecretBackendsArgs, ListSecretBackendsResults,
    RemoveSecretBackendArg, RemoveSecretBackendArgs, SecretBackendsApi, UpdateSecretBackendArg,
    UpdateSecretBackendArgs,
};
pub use error::{ApiError, ErrorResult, ErrorResults};
pub use migration::{MigrationApi, RemoveMigrationTasksArgs, RotateBackendTokenArgs, RotationChanges};
