//! # Error Types
//!
//! Error taxonomy for the secret backend control plane using `thiserror`.
//!
//! Validation and authorization errors are surfaced to the caller as-is and
//! never retried. Backend I/O failures abort the current mutation or
//! migration pass. Watcher closure is fatal to the owning loop.

/// Custom result type for secretplane operations
pub type Result<T> = std::result::Result<T, SecretplaneError>;

/// Main error type for the secret backend control plane
#[derive(thiserror::Error, Debug)]
pub enum SecretplaneError {
    /// Malformed name, config, tag or URI
    #[error("{message}")]
    NotValid { message: String, field: Option<String> },

    /// Backend, secret, revision or model absent
    #[error("{resource_type} {id:?} not found")]
    NotFound { resource_type: String, id: String },

    /// Duplicate backend name
    #[error("{resource_type} {id:?} already exists")]
    AlreadyExists { resource_type: String, id: String },

    /// Authorization failure
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// Operation not supported by the provider (e.g. token refresh)
    #[error("{message} not supported")]
    NotSupported { message: String },

    /// Mutation blocked by live references
    #[error("{message}")]
    Conflict { message: String, resource_type: String },

    /// Secret backend I/O failure (ping/get/save/delete)
    #[error("secret backend {backend}: {message}")]
    Backend { backend: String, message: String },

    /// Bounded backend call exceeded its deadline
    #[error("operation timed out: {operation} after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// A notification stream closed underneath its consumer
    #[error("{watcher} watcher closed")]
    WatcherClosed { watcher: String },

    /// Database and storage errors
    #[error("Database error: {context}")]
    Database {
        #[source]
        source: sqlx::Error,
        context: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SecretplaneError {
    /// Create a not-valid error
    pub fn not_valid<S: Into<String>>(message: S) -> Self {
        Self::NotValid { message: message.into(), field: None }
    }

    /// Create a not-valid error naming the offending field
    pub fn not_valid_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::NotValid { message: message.into(), field: Some(field.into()) }
    }

    /// Create a not found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create an already-exists error
    pub fn already_exists<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::AlreadyExists { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create a permission denied error
    pub fn permission_denied<S: Into<String>>(message: S) -> Self {
        Self::PermissionDenied { message: message.into() }
    }

    /// Create a not supported error
    pub fn not_supported<S: Into<String>>(message: S) -> Self {
        Self::NotSupported { message: message.into() }
    }

    /// Create a conflict error
    pub fn conflict<M: Into<String>, R: Into<String>>(message: M, resource_type: R) -> Self {
        Self::Conflict { message: message.into(), resource_type: resource_type.into() }
    }

    /// Create a backend I/O error
    pub fn backend<B: Into<String>, M: Into<String>>(backend: B, message: M) -> Self {
        Self::Backend { backend: backend.into(), message: message.into() }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, duration_ms: u64) -> Self {
        Self::Timeout { operation: operation.into(), duration_ms }
    }

    /// Create a watcher-closed error
    pub fn watcher_closed<S: Into<String>>(watcher: S) -> Self {
        Self::WatcherClosed { watcher: watcher.into() }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Wrap a sqlx error with context
    pub fn database<S: Into<String>>(source: sqlx::Error, context: S) -> Self {
        Self::Database { source, context: context.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_not_valid(&self) -> bool {
        matches!(self, Self::NotValid { .. })
    }

    pub fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Get the HTTP status code that should be returned for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotValid { .. } => 400,
            Self::Serialization { .. } => 400,
            Self::PermissionDenied { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Timeout { .. } => 408,
            Self::AlreadyExists { .. } => 409,
            Self::Conflict { .. } => 409,
            Self::NotSupported { .. } => 501,
            Self::Backend { .. } => 502,
            Self::WatcherClosed { .. } => 500,
            Self::Database { .. } => 500,
            Self::Config { .. } => 500,
            Self::Io { .. } => 500,
            Self::Internal { .. } => 500,
        }
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Backend { .. } | Self::Timeout { .. } | Self::Database { .. } | Self::Io { .. }
        )
    }
}

// Error conversions for common external error types
impl From<sqlx::Error> for SecretplaneError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database { source: error, context: "Database operation failed".to_string() }
    }
}

impl From<std::io::Error> for SecretplaneError {
    fn from(error: std::io::Error) -> Self {
        Self::Io { source: error, context: "I/O operation failed".to_string() }
    }
}

impl From<serde_json::Error> for SecretplaneError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<config::ConfigError> for SecretplaneError {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<validator::ValidationErrors> for SecretplaneError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::not_valid(format!("Validation failed: {}", message))
    }
}
