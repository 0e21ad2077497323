//! Facade error results
//!
//! Bulk facade calls answer with one [`ErrorResult`] per argument. Errors
//! are flattened to a wire code and a message.

use crate::errors::SecretplaneError;
use serde::{Deserialize, Serialize};

pub const CODE_NOT_VALID: &str = "not valid";
pub const CODE_NOT_FOUND: &str = "not found";
pub const CODE_ALREADY_EXISTS: &str = "already exists";
pub const CODE_UNAUTHORIZED: &str = "unauthorized access";
pub const CODE_NOT_SUPPORTED: &str = "not supported";
pub const CODE_CONFLICT: &str = "conflict";
pub const CODE_INTERNAL: &str = "internal";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl From<&SecretplaneError> for ApiError {
    fn from(err: &SecretplaneError) -> Self {
        let code = match err {
            SecretplaneError::NotValid { .. } => CODE_NOT_VALID,
            SecretplaneError::NotFound { .. } => CODE_NOT_FOUND,
            SecretplaneError::AlreadyExists { .. } => CODE_ALREADY_EXISTS,
            SecretplaneError::PermissionDenied { .. } => CODE_UNAUTHORIZED,
            SecretplaneError::NotSupported { .. } => CODE_NOT_SUPPORTED,
            SecretplaneError::Conflict { .. } => CODE_CONFLICT,
            _ => CODE_INTERNAL,
        };
        Self { code: code.to_string(), message: err.to_string() }
    }
}

impl From<SecretplaneError> for ApiError {
    fn from(err: SecretplaneError) -> Self {
        Self::from(&err)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl ErrorResult {
    pub fn ok() -> Self {
        Self { error: None }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

impl<T> From<crate::errors::Result<T>> for ErrorResult {
    fn from(result: crate::errors::Result<T>) -> Self {
        match result {
            Ok(_) => Self::ok(),
            Err(e) => Self { error: Some(ApiError::from(e)) },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResults {
    pub results: Vec<ErrorResult>,
}

impl ErrorResults {
    /// First failure, if any
    pub fn combine(&self) -> Option<&ApiError> {
        self.results.iter().find_map(|r| r.error.as_ref())
    }
}
