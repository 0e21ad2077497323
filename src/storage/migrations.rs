//! # Database Migration Management
//!
//! Schema evolution using SQL migrations embedded in the binary. Applied
//! versions are tracked in `schema_migrations`; each migration runs in its
//! own transaction.

use crate::errors::{Result, SecretplaneError};
use crate::storage::DbPool;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::{error, info, warn};

/// Embedded migrations, ordered by version
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "20250601000001_create_secret_backends_table",
        include_str!("../../migrations/20250601000001_create_secret_backends_table.sql"),
    ),
    (
        "20250601000002_create_models_table",
        include_str!("../../migrations/20250601000002_create_models_table.sql"),
    ),
    (
        "20250601000003_create_secrets_tables",
        include_str!("../../migrations/20250601000003_create_secrets_tables.sql"),
    ),
    (
        "20250601000004_create_migration_tasks_table",
        include_str!("../../migrations/20250601000004_create_migration_tasks_table.sql"),
    ),
    (
        "20250601000005_create_internal_secret_content_table",
        include_str!("../../migrations/20250601000005_create_internal_secret_content_table.sql"),
    ),
];

/// Migration information structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationInfo {
    pub version: i64,
    pub description: String,
    pub installed_on: chrono::DateTime<chrono::Utc>,
    pub execution_time: i64,
}

/// Run all pending database migrations
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    info!("Starting database migration process");

    create_migration_table(pool).await?;
    let applied = get_applied_migration_versions(pool).await?;

    let mut migrations_run = 0;
    for (name, sql) in MIGRATIONS {
        let version = extract_version_from_filename(name)?;
        if applied.contains(&version) {
            continue;
        }

        info!(version, "Running migration: {}", name);
        let start_time = std::time::Instant::now();

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| SecretplaneError::database(e, "Failed to start migration transaction"))?;

        sqlx::raw_sql(sql).execute(&mut *tx).await.map_err(|e| {
            error!(error = %e, migration = name, "Migration failed");
            SecretplaneError::database(e, format!("Migration failed: {}", name))
        })?;

        let execution_time = start_time.elapsed().as_millis() as i64;
        sqlx::query(
            "INSERT INTO schema_migrations (version, description, execution_time, installed_on) VALUES ($1, $2, $3, $4)",
        )
        .bind(version)
        .bind(*name)
        .bind(execution_time)
        .bind(chrono::Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| SecretplaneError::database(e, format!("Failed to record migration: {}", name)))?;

        tx.commit()
            .await
            .map_err(|e| SecretplaneError::database(e, "Failed to commit migration transaction"))?;

        migrations_run += 1;
        info!(version, execution_time_ms = execution_time, "Migration completed: {}", name);
    }

    if migrations_run > 0 {
        info!(count = migrations_run, "Database migrations completed");
    } else {
        info!("No pending migrations");
    }
    Ok(())
}

async fn create_migration_table(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            execution_time INTEGER NOT NULL,
            installed_on TEXT NOT NULL
        )
    "#,
    )
    .execute(pool)
    .await
    .map_err(|e| SecretplaneError::database(e, "Failed to create migration tracking table"))?;
    Ok(())
}

async fn get_applied_migration_versions(pool: &DbPool) -> Result<Vec<i64>> {
    let rows = sqlx::query("SELECT version FROM schema_migrations ORDER BY version")
        .fetch_all(pool)
        .await
        .map_err(|e| SecretplaneError::database(e, "Failed to get applied migrations"))?;
    Ok(rows.into_iter().map(|row| row.get::<i64, _>("version")).collect())
}

fn extract_version_from_filename(filename: &str) -> Result<i64> {
    let version_str = filename.split('_').next().unwrap_or_default();
    version_str
        .parse::<i64>()
        .map_err(|_| SecretplaneError::internal(format!("Invalid version in migration: {}", filename)))
}

/// Check that exactly the embedded migrations are applied
pub async fn validate_migrations(pool: &DbPool) -> Result<bool> {
    let applied = get_applied_migration_versions(pool).await?;
    let expected = MIGRATIONS
        .iter()
        .map(|(name, _)| extract_version_from_filename(name))
        .collect::<Result<Vec<_>>>()?;

    for version in &expected {
        if !applied.contains(version) {
            warn!(version, "Missing migration");
            return Ok(false);
        }
    }
    for version in &applied {
        if !expected.contains(version) {
            warn!(version, "Unexpected migration found");
            return Ok(false);
        }
    }
    Ok(true)
}

/// List all applied migrations
pub async fn list_applied_migrations(pool: &DbPool) -> Result<Vec<MigrationInfo>> {
    let rows = sqlx::query(
        "SELECT version, description, execution_time, installed_on FROM schema_migrations ORDER BY version",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| SecretplaneError::database(e, "Failed to list applied migrations"))?;

    Ok(rows
        .into_iter()
        .map(|row| MigrationInfo {
            version: row.get("version"),
            description: row.get("description"),
            installed_on: row.get("installed_on"),
            execution_time: row.get("execution_time"),
        })
        .collect())
}
