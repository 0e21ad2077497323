//! # Secret Backends
//!
//! Pluggable storage for secret revision content and the services built on
//! top of it:
//!
//! - [`providers`]: backend types (`controller`, `vault`, `kubernetes`) and
//!   the registry they are looked up in
//! - [`backend_service`]: CRUD, health and token rotation over backend instances
//! - [`router`]: resolves a revision's [`ValueRef`](crate::domain::ValueRef)
//!   to a live backend client and moves content between backends
//! - [`access`]: grant, revoke and role resolution
//! - [`rotation`]: the token rotation loop
//!
//! Secret values are held in [`SecretValue`], which never prints its
//! content and is zeroized on drop.

pub mod access;
pub mod backend_service;
pub mod providers;
pub mod rotation;
pub mod router;
pub mod types;

pub use access::AccessControlEvaluator;
pub use backend_service::{redact_config, SecretBackendService};
pub use providers::{
    ProviderConfig, ProviderRegistry, SecretBackendProvider, SecretsBackend,
};
pub use rotation::TokenRotationWorker;
pub use router::{BackendConfigInfo, CloudCredentialService, ContentRouter, NoCloudCredentials};
pub use types::{SecretString, SecretValue, REDACTED};
