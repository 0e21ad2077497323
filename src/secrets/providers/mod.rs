//! # Secret Backend Providers
//!
//! Pluggable storage for secret revision content. Providers are registered
//! explicitly in a [`ProviderRegistry`] and looked up by backend type.

pub mod internal;
pub mod kubernetes;
pub mod provider;
pub mod registry;
pub mod vault;

pub use internal::ControllerProvider;
pub use kubernetes::{KubernetesProvider, KUBERNETES_BACKEND_TYPE};
pub use provider::{ProviderConfig, SecretBackendProvider, SecretsBackend};
pub use registry::ProviderRegistry;
pub use vault::{VaultProvider, VAULT_BACKEND_TYPE};
