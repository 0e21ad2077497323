//! # Error Handling
//!
//! Error types shared by the backend registry, content router, access
//! evaluator and migration loops.

pub mod types;

pub use types::{Result, SecretplaneError};
