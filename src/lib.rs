//! # Secretplane
//!
//! Control-plane core for secret content: a registry of pluggable secret
//! backends, routing of revision content to the backend that holds it,
//! access grants, and migration of content when a model's active backend
//! changes.
//!
//! ## Architecture
//!
//! ```text
//! Facades (api) → SecretBackendService / AccessControlEvaluator
//!      ↓                      ↓
//! ContentRouter → ProviderRegistry → controller | vault | kubernetes
//!      ↓
//! Storage (SQLite) → Notifier → MigrationCoordinator → MigrationWorker
//! ```
//!
//! ## Core Components
//!
//! - **Backend registry**: CRUD, health and token rotation over backend records
//! - **Content router**: resolves a `ValueRef` to a live backend client
//! - **Access control**: grant, revoke and role resolution
//! - **Migration**: per-model coordinator and per-owner workers
//! - **Persistence**: SQLx with SQLite
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use secretplane::{config::AppConfig, startup::Controller, Result};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = AppConfig::load(None)?;
//!     let controller = Controller::connect(config).await?;
//!     controller.run(CancellationToken::new()).await
//! }
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod errors;
pub mod migration;
pub mod observability;
pub mod runtime;
pub mod secrets;
pub mod startup;
pub mod storage;

pub use config::AppConfig;
pub use errors::{Result, SecretplaneError};
pub use observability::{init_observability, init_tracing};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
