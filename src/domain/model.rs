//! Models (deployments)

use super::backend::AUTO_BACKEND_NAME;
use super::id::ModelUuid;
use crate::errors::{Result, SecretplaneError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Iaas,
    Caas,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Iaas => "iaas",
            Self::Caas => "caas",
        }
    }
}

impl FromStr for ModelType {
    type Err = SecretplaneError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "iaas" => Ok(Self::Iaas),
            "caas" => Ok(Self::Caas),
            other => Err(SecretplaneError::not_valid(format!("model type {:?} not valid", other))),
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub uuid: ModelUuid,
    pub name: String,
    pub model_type: ModelType,
    pub cloud: String,
    pub cloud_credential: Option<String>,
    /// Model-config `secret-backend`: `auto`, `internal` or a backend name
    pub secret_backend: String,
}

impl Model {
    pub fn new(uuid: ModelUuid, name: impl Into<String>, model_type: ModelType) -> Self {
        Self {
            uuid,
            name: name.into(),
            model_type,
            cloud: String::new(),
            cloud_credential: None,
            secret_backend: AUTO_BACKEND_NAME.to_string(),
        }
    }

    /// Name of the per-model backend built from cloud credentials on caas models
    pub fn local_backend_name(&self) -> String {
        format!("{}-local", self.name)
    }
}

/// Cloud endpoint and credential used to build a model's own backend
#[derive(Debug, Clone)]
pub struct CloudSpec {
    pub cloud_type: String,
    pub endpoint: String,
    pub ca_certificates: Vec<String>,
    pub namespace: String,
    pub token: Option<crate::secrets::types::SecretString>,
}
