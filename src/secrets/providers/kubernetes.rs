//! Kubernetes secret backend provider
//!
//! Stores each revision as an `Opaque` Secret object named
//! `<secret-id>-<revision>` in the configured namespace, through the core v1
//! REST API. Secret data is already base64 encoded, which is also the form
//! Kubernetes expects in `data`.

use super::provider::{
    check_endpoint, check_known_keys, config_str, content_name, required_str, ProviderConfig,
    SecretBackendProvider, SecretsBackend,
};
use crate::domain::{BackendConfig, SecretUri};
use crate::errors::{Result, SecretplaneError};
use crate::secrets::types::SecretValue;
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const KUBERNETES_BACKEND_TYPE: &str = "kubernetes";

pub const CONFIG_ENDPOINT: &str = "endpoint";
pub const CONFIG_NAMESPACE: &str = "namespace";
pub const CONFIG_TOKEN: &str = "token";
pub const CONFIG_CA_CERTS: &str = "ca-certs";
pub const CONFIG_SERVICE_ACCOUNT: &str = "service-account";

const KNOWN_KEYS: &[&str] =
    &[CONFIG_ENDPOINT, CONFIG_NAMESPACE, CONFIG_TOKEN, CONFIG_CA_CERTS, CONFIG_SERVICE_ACCOUNT];

const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const TOKEN_EXPIRATION_SECONDS: i64 = 86400;

#[derive(Debug, Default)]
pub struct KubernetesProvider;

impl KubernetesProvider {
    pub fn new() -> Self {
        Self
    }
}

fn ca_certs(config: &BackendConfig) -> Result<Vec<String>> {
    match config.get(CONFIG_CA_CERTS) {
        None | Some(Value::Null) => Ok(vec![]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    SecretplaneError::not_valid_field("ca-certs must be a list of PEM strings", CONFIG_CA_CERTS)
                })
            })
            .collect(),
        Some(Value::String(pem)) => Ok(vec![pem.clone()]),
        Some(_) => Err(SecretplaneError::not_valid_field(
            "ca-certs must be a list of PEM strings",
            CONFIG_CA_CERTS,
        )),
    }
}

/// API access shared by the backend client and token refresh
#[derive(Clone)]
struct ApiClient {
    http: reqwest::Client,
    endpoint: String,
    namespace: String,
    token: Option<String>,
    label: String,
}

impl ApiClient {
    fn from_config(config: &BackendConfig, label: &str) -> Result<Self> {
        let endpoint = check_endpoint(config, CONFIG_ENDPOINT)?;
        let namespace = required_str(config, CONFIG_NAMESPACE)?.to_string();

        let mut builder = reqwest::Client::builder().use_rustls_tls();
        for pem in ca_certs(config)? {
            let cert = reqwest::Certificate::from_pem(pem.as_bytes()).map_err(|e| {
                SecretplaneError::not_valid_field(format!("invalid CA certificate: {}", e), CONFIG_CA_CERTS)
            })?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder.build().map_err(|e| {
            SecretplaneError::config(format!("Failed to create Kubernetes client: {}", e))
        })?;

        Ok(Self {
            http,
            endpoint: endpoint.as_str().trim_end_matches('/').to_string(),
            namespace,
            token: config_str(config, CONFIG_TOKEN).map(str::to_string),
            label: label.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/namespaces/{}/{}", self.endpoint, self.namespace, path)
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<reqwest::Response> {
        let mut request = self.http.request(method.clone(), self.url(path));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        request.send().await.map_err(|e| {
            SecretplaneError::backend(&self.label, format!("{} {} failed: {}", method, path, e))
        })
    }

    async fn status_error(&self, what: &str, response: reqwest::Response) -> SecretplaneError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or(body);
        SecretplaneError::backend(&self.label, format!("{}: {} {}", what, status, message))
    }
}

#[derive(Deserialize)]
struct SecretObject {
    #[serde(default)]
    data: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct TokenRequestStatus {
    token: String,
}

#[derive(Deserialize)]
struct TokenRequestResponse {
    status: TokenRequestStatus,
}

#[async_trait]
impl SecretBackendProvider for KubernetesProvider {
    fn provider_type(&self) -> &'static str {
        KUBERNETES_BACKEND_TYPE
    }

    fn validate_config(&self, old: Option<&BackendConfig>, new: &BackendConfig) -> Result<()> {
        check_known_keys(new, KNOWN_KEYS, KUBERNETES_BACKEND_TYPE)?;
        check_endpoint(new, CONFIG_ENDPOINT)?;
        required_str(new, CONFIG_NAMESPACE)?;
        ca_certs(new)?;

        if let Some(old) = old {
            if config_str(old, CONFIG_NAMESPACE) != config_str(new, CONFIG_NAMESPACE) {
                return Err(SecretplaneError::not_valid_field(
                    "cannot change the namespace of a kubernetes backend",
                    CONFIG_NAMESPACE,
                ));
            }
        }
        Ok(())
    }

    fn sensitive_keys(&self) -> &'static [&'static str] {
        &[CONFIG_TOKEN]
    }

    fn supports_token_refresh(&self) -> bool {
        true
    }

    async fn refresh_token(&self, config: &BackendConfig) -> Result<BackendConfig> {
        let service_account = config_str(config, CONFIG_SERVICE_ACCOUNT).ok_or_else(|| {
            SecretplaneError::not_valid_field(
                "token refresh requires a service-account",
                CONFIG_SERVICE_ACCOUNT,
            )
        })?;
        let api = ApiClient::from_config(config, KUBERNETES_BACKEND_TYPE)?;

        let body = json!({
            "apiVersion": "authentication.k8s.io/v1",
            "kind": "TokenRequest",
            "spec": { "expirationSeconds": TOKEN_EXPIRATION_SECONDS }
        });
        let path = format!("serviceaccounts/{}/token", service_account);
        let response = api.send(Method::POST, &path, Some(body)).await?;
        if !response.status().is_success() {
            return Err(api.status_error("token request", response).await);
        }
        let token: TokenRequestResponse = response.json().await.map_err(|e| {
            SecretplaneError::backend(KUBERNETES_BACKEND_TYPE, format!("invalid token response: {}", e))
        })?;

        let mut refreshed = config.clone();
        refreshed.insert(CONFIG_TOKEN.to_string(), Value::String(token.status.token));
        info!(service_account, "Issued new kubernetes backend token");
        Ok(refreshed)
    }

    fn new_backend(&self, config: &ProviderConfig) -> Result<Box<dyn SecretsBackend>> {
        let api = ApiClient::from_config(&config.config, &config.backend_name)?;
        Ok(Box::new(KubernetesBackend { api }))
    }
}

pub struct KubernetesBackend {
    api: ApiClient,
}

impl std::fmt::Debug for KubernetesBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesBackend")
            .field("name", &self.api.label)
            .field("endpoint", &self.api.endpoint)
            .field("namespace", &self.api.namespace)
            .finish()
    }
}

#[async_trait]
impl SecretsBackend for KubernetesBackend {
    async fn ping(&self) -> Result<()> {
        let response = self.api.send(Method::GET, "secrets?limit=1", None).await?;
        if !response.status().is_success() {
            return Err(self.api.status_error("list secrets", response).await);
        }
        Ok(())
    }

    async fn get_content(&self, revision_id: &str) -> Result<SecretValue> {
        let response =
            self.api.send(Method::GET, &format!("secrets/{}", revision_id), None).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(SecretplaneError::not_found("secret content", revision_id)),
            status if status.is_success() => {
                let object: SecretObject = response.json().await.map_err(|e| {
                    SecretplaneError::backend(&self.api.label, format!("invalid secret object: {}", e))
                })?;
                Ok(SecretValue::from_stored(object.data))
            }
            _ => Err(self.api.status_error("get secret", response).await),
        }
    }

    async fn save_content(
        &self,
        uri: &SecretUri,
        revision: i64,
        value: &SecretValue,
    ) -> Result<String> {
        let name = content_name(uri, revision);
        let object = json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "type": "Opaque",
            "metadata": {
                "name": name,
                "labels": { MANAGED_BY_LABEL: "secretplane" }
            },
            "data": value.expose(),
        });

        let response = self.api.send(Method::POST, "secrets", Some(object.clone())).await?;
        let response = if response.status() == StatusCode::CONFLICT {
            debug!(name = %name, "Secret object exists, replacing");
            self.api.send(Method::PUT, &format!("secrets/{}", name), Some(object)).await?
        } else {
            response
        };

        if !response.status().is_success() {
            return Err(self.api.status_error("save secret", response).await);
        }
        Ok(name)
    }

    async fn delete_content(&self, revision_id: &str) -> Result<()> {
        let response =
            self.api.send(Method::DELETE, &format!("secrets/{}", revision_id), None).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            _ => Err(self.api.status_error("delete secret", response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BackendId;

    fn config(value: Value) -> BackendConfig {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_validate_config_requires_namespace() {
        let provider = KubernetesProvider::new();
        let cfg = config(json!({"endpoint": "https://10.0.0.1:6443"}));
        assert!(provider.validate_config(None, &cfg).unwrap_err().is_not_valid());

        let cfg = config(json!({"endpoint": "https://10.0.0.1:6443", "namespace": "wp"}));
        assert!(provider.validate_config(None, &cfg).is_ok());
    }

    #[test]
    fn test_namespace_is_immutable() {
        let provider = KubernetesProvider::new();
        let old = config(json!({"endpoint": "https://k8s:6443", "namespace": "a"}));
        let new = config(json!({"endpoint": "https://k8s:6443", "namespace": "b"}));
        assert!(provider.validate_config(Some(&old), &new).is_err());
        assert!(provider.validate_config(Some(&old), &old).is_ok());
    }

    #[test]
    fn test_ca_certs_shapes() {
        assert!(ca_certs(&config(json!({}))).unwrap().is_empty());
        assert_eq!(ca_certs(&config(json!({"ca-certs": "pem"}))).unwrap(), vec!["pem"]);
        assert_eq!(ca_certs(&config(json!({"ca-certs": ["a", "b"]}))).unwrap().len(), 2);
        assert!(ca_certs(&config(json!({"ca-certs": [1]}))).is_err());
        assert!(ca_certs(&config(json!({"ca-certs": 7}))).is_err());
    }

    #[tokio::test]
    async fn test_refresh_requires_service_account() {
        let provider = KubernetesProvider::new();
        let cfg = config(json!({"endpoint": "https://k8s:6443", "namespace": "wp"}));
        let err = provider.refresh_token(&cfg).await.unwrap_err();
        assert!(err.is_not_valid());
    }

    #[test]
    fn test_urls() {
        let cfg = config(json!({"endpoint": "https://k8s:6443/", "namespace": "wp"}));
        let api = ApiClient::from_config(&cfg, "wp-local").unwrap();
        assert_eq!(api.url("secrets/abc-1"), "https://k8s:6443/api/v1/namespaces/wp/secrets/abc-1");

        let provider_config = ProviderConfig::new(BackendId::from("b2"), "wp-local", "kubernetes", cfg);
        let backend = KubernetesProvider::new().new_backend(&provider_config).unwrap();
        assert!(format!("{:?}", backend).contains("wp-local"));
    }
}
