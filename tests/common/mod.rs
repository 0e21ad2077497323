//! Common test utilities for all integration tests.
//!
//! Provides shared test database setup, an in-memory secret backend
//! provider with failure injection, and a fully assembled controller.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

pub mod fake_provider;
pub mod fixtures;
pub mod test_db;
