//! Provider registry
//!
//! Maps backend type names to provider implementations. Built once at
//! startup and shared by the backend service and the content router.

use super::internal::ControllerProvider;
use super::kubernetes::KubernetesProvider;
use super::provider::SecretBackendProvider;
use super::vault::VaultProvider;
use crate::errors::{Result, SecretplaneError};
use crate::storage::InternalContentRepository;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn SecretBackendProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry").field("providers", &self.provider_types()).finish()
    }
}

impl ProviderRegistry {
    /// Create a registry with no providers
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in providers: `controller`, `vault` and `kubernetes`
    pub fn with_defaults(internal_content: Arc<dyn InternalContentRepository>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ControllerProvider::new(internal_content)));
        registry.register(Arc::new(VaultProvider::new()));
        registry.register(Arc::new(KubernetesProvider::new()));
        registry
    }

    /// Register a provider, replacing any provider of the same type
    pub fn register(&mut self, provider: Arc<dyn SecretBackendProvider>) {
        let provider_type = provider.provider_type();
        info!(provider_type, "Registering secret backend provider");
        self.providers.insert(provider_type, provider);
    }

    pub fn has_provider(&self, provider_type: &str) -> bool {
        self.providers.contains_key(provider_type)
    }

    /// Registered type names, sorted
    pub fn provider_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = self.providers.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Look up the provider for a backend type
    pub fn provider(&self, provider_type: &str) -> Result<Arc<dyn SecretBackendProvider>> {
        self.providers.get(provider_type).cloned().ok_or_else(|| {
            SecretplaneError::not_supported(format!("secret backend type {:?}", provider_type))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_not_supported() {
        let registry = ProviderRegistry::new();
        let err = registry.provider("aws").err().unwrap();
        assert!(err.is_not_supported());
        assert_eq!(err.to_string(), "secret backend type \"aws\" not supported");
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(VaultProvider::new()));
        registry.register(Arc::new(KubernetesProvider::new()));

        assert!(registry.has_provider("vault"));
        assert!(!registry.has_provider("controller"));
        assert_eq!(registry.provider_types(), vec!["kubernetes", "vault"]);
        assert_eq!(registry.provider("vault").unwrap().provider_type(), "vault");
    }
}
