//! # Repositories
//!
//! Each repository is an `async_trait` trait with a SQLx implementation
//! over the SQLite pool.

pub mod backend;
pub mod grant;
pub mod internal_content;
pub mod migration_task;
pub mod model;
pub mod secret;

pub use backend::{DeletedBackend, SecretBackendRepository, SqlxSecretBackendRepository};
pub use grant::{SecretGrantRepository, SqlxSecretGrantRepository};
pub use internal_content::{InternalContentRepository, SqlxInternalContentRepository};
pub use migration_task::{MigrationTaskRepository, SqlxMigrationTaskRepository};
pub use model::{ModelRepository, SqlxModelRepository};
pub use secret::{BackendReference, SecretRepository, SqlxSecretRepository};

/// SQLite UNIQUE (2067) or PRIMARY KEY (1555) constraint violation
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|db_err| db_err.code())
        .map(|code| code.as_ref() == "2067" || code.as_ref() == "1555")
        .unwrap_or(false)
}
