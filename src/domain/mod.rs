//! Domain layer
//!
//! Pure domain entities of the secret control plane: tags, secret URIs,
//! secrets and revisions, backend records, access roles, migration tasks and
//! models. Nothing here touches the database or a backend.
//!
//! ## Module Organization
//!
//! - `id`: Type-safe identifiers with the NewType pattern
//! - `tag`: Owner, subject and scope tags
//! - `uri`: Secret URIs
//! - `secret`: Secret metadata, revisions and revision content
//! - `backend`: Secret backend records and their parameters
//! - `access`: Roles and grants
//! - `migration`: Migration task bookkeeping
//! - `model`: Models and cloud specs

pub mod access;
pub mod backend;
pub mod id;
pub mod migration;
pub mod model;
pub mod secret;
pub mod tag;
pub mod uri;

pub use access::{AccessParams, Role, SecretAccessGrant};
pub use backend::{
    next_rotate_time, validate_backend_name, validate_rotate_interval, BackendConfig,
    BackendFilter, BackendStatus,
    CreateSecretBackendParams, RotationChange, SecretBackend, SecretBackendInfo,
    UpdateSecretBackendParams, AUTO_BACKEND_NAME, CONTROLLER_BACKEND_TYPE, INTERNAL_BACKEND_NAME,
    MIN_TOKEN_ROTATE_INTERVAL,
};
pub use id::{BackendId, ModelUuid};
pub use migration::{MigrationTask, TaskEvent, TaskState};
pub use model::{CloudSpec, Model, ModelType};
pub use secret::{
    CreateSecretParams, RevisionContent, RotatePolicy, SecretMetadata, SecretRevision, ValueRef,
};
pub use tag::{Tag, TagKind};
pub use uri::SecretUri;
