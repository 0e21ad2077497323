//! Test database utilities for integration tests.
//!
//! Provides file-based SQLite databases under `data/test/` for test isolation
//! and easier debugging of test failures.

#![allow(clippy::duplicate_mod)]

use secretplane::config::DatabaseConfig;
use secretplane::storage::{create_pool, DbPool};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Counter for generating unique database names within a test run
static DB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Get the test database directory path
fn test_db_dir() -> PathBuf {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(manifest_dir).join("data").join("test")
}

/// Generate a unique database filename for a test
fn unique_db_name(prefix: &str) -> String {
    let counter = DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    let uuid_short = &Uuid::new_v4().to_string()[..8];
    format!("{}_{}_{}_{}.db", prefix, std::process::id(), counter, uuid_short)
}

/// A migrated test database that is deleted on drop.
pub struct TestDatabase {
    pub pool: DbPool,
    pub path: PathBuf,
    cleanup_on_drop: bool,
}

impl TestDatabase {
    /// Create a new test database with migrations applied.
    ///
    /// The database file is created under `data/test/` with a unique name.
    pub async fn new(prefix: &str) -> Self {
        Self::with_cleanup(prefix, true).await
    }

    /// Set `cleanup_on_drop` to `false` to keep the file for debugging.
    pub async fn with_cleanup(prefix: &str, cleanup_on_drop: bool) -> Self {
        let db_dir = test_db_dir();
        std::fs::create_dir_all(&db_dir).expect("create test database directory");

        let path = db_dir.join(unique_db_name(prefix));
        let config = DatabaseConfig {
            url: format!("sqlite://{}?mode=rwc", path.display()),
            max_connections: 5,
            min_connections: 1,
            auto_migrate: true,
            ..Default::default()
        };
        let pool = create_pool(&config).await.expect("create test database pool");

        Self { pool, path, cleanup_on_drop }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Disable cleanup on drop (useful for debugging).
    pub fn keep_on_drop(&mut self) {
        self.cleanup_on_drop = false;
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        if self.cleanup_on_drop {
            // Best effort cleanup - don't panic in drop
            if let Err(e) = std::fs::remove_file(&self.path) {
                eprintln!("Warning: Failed to cleanup test database {:?}: {}", self.path, e);
            }
            let _ = std::fs::remove_file(self.path.with_extension("db-wal"));
            let _ = std::fs::remove_file(self.path.with_extension("db-shm"));
        }
    }
}
