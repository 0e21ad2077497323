//! # Storage and Persistence
//!
//! SQLite persistence for backend records, models, secrets, grants,
//! migration tasks and the controller backend's content.

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use migrations::{list_applied_migrations, run_migrations, validate_migrations, MigrationInfo};
pub use pool::{create_pool, DbPool};
pub use repositories::{
    BackendReference, DeletedBackend, InternalContentRepository, MigrationTaskRepository,
    ModelRepository, SecretBackendRepository, SecretGrantRepository, SecretRepository,
    SqlxInternalContentRepository, SqlxMigrationTaskRepository, SqlxModelRepository,
    SqlxSecretBackendRepository, SqlxSecretGrantRepository, SqlxSecretRepository,
};

use crate::runtime::Notifier;
use std::sync::Arc;

/// The repositories shared by the services, the loops and the facades
#[derive(Clone)]
pub struct Store {
    pub backends: Arc<dyn SecretBackendRepository>,
    pub models: Arc<dyn ModelRepository>,
    pub secrets: Arc<dyn SecretRepository>,
    pub grants: Arc<dyn SecretGrantRepository>,
    pub tasks: Arc<dyn MigrationTaskRepository>,
    pub internal_content: Arc<dyn InternalContentRepository>,
}

impl Store {
    /// SQLx-backed repositories over one pool, publishing through `notifier`
    pub fn new(pool: DbPool, notifier: Notifier) -> Self {
        Self {
            backends: Arc::new(SqlxSecretBackendRepository::new(pool.clone())),
            models: Arc::new(SqlxModelRepository::new(pool.clone(), notifier.clone())),
            secrets: Arc::new(SqlxSecretRepository::new(pool.clone())),
            grants: Arc::new(SqlxSecretGrantRepository::new(pool.clone())),
            tasks: Arc::new(SqlxMigrationTaskRepository::new(pool.clone(), notifier)),
            internal_content: Arc::new(SqlxInternalContentRepository::new(pool)),
        }
    }
}
