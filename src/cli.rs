//! # Command Line Interface
//!
//! Runs the controller loops, manages the database schema and inspects
//! registered secret backends.

use crate::config::AppConfig;
use crate::domain::{BackendFilter, SecretBackendInfo};
use crate::observability::{init_observability, log_config_info};
use crate::startup::Controller;
use crate::storage::{
    create_pool, list_applied_migrations, run_migrations, validate_migrations, MigrationInfo,
};
use crate::{APP_NAME, VERSION};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "secretplane")]
#[command(about = "Secret backend control plane")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path (YAML or TOML)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Database URL override
    #[arg(long)]
    pub database_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the migration coordinators and the token rotation worker
    Serve,

    /// Database management commands
    Database {
        #[command(subcommand)]
        command: DatabaseCommands,
    },

    /// Secret backend inspection
    Backends {
        #[command(subcommand)]
        command: BackendCommands,
    },
}

#[derive(Subcommand)]
pub enum DatabaseCommands {
    /// Run pending migrations
    Migrate,

    /// List all applied migrations
    List,

    /// Validate database schema
    Validate,
}

#[derive(Subcommand)]
pub enum BackendCommands {
    /// List registered backends with their health and secret counts
    List {
        /// Backend names; all backends when empty
        names: Vec<String>,

        /// Output format: table, json or yaml
        #[arg(short, long, default_value = "table")]
        output: String,
    },
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Yaml,
    Table,
}

impl std::str::FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "yaml" => Ok(OutputFormat::Yaml),
            "table" => Ok(OutputFormat::Table),
            _ => anyhow::bail!(
                "Unsupported output format: '{}'. Use 'json', 'yaml', or 'table'.",
                s
            ),
        }
    }
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if cli.verbose {
        config.observability.log_level = "debug".to_string();
    }
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }

    init_observability(&config.observability)?;
    info!(app_name = APP_NAME, version = VERSION, "Starting secret control plane");
    log_config_info(&config);

    match cli.command {
        Some(Commands::Serve) | None => serve(config).await?,
        Some(Commands::Database { command }) => handle_database_command(command, &config).await?,
        Some(Commands::Backends { command }) => handle_backend_command(command, config).await?,
    }

    Ok(())
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let controller = Controller::connect(config).await?;
    let shutdown = CancellationToken::new();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        signal_token.cancel();
    });

    controller.run(shutdown).await?;
    info!("Secret control plane stopped");
    Ok(())
}

/// Handle database management commands
async fn handle_database_command(
    command: DatabaseCommands,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let pool = create_pool(&config.database).await?;

    match command {
        DatabaseCommands::Migrate => {
            println!("Running database migrations...");
            run_migrations(&pool).await?;
            println!("Migrations completed successfully!");
        }

        DatabaseCommands::List => {
            let migrations = list_applied_migrations(&pool).await?;
            if migrations.is_empty() {
                println!("No migrations have been applied");
            } else {
                println!("Applied migrations:");
                print_migrations_table(&migrations);
            }
        }

        DatabaseCommands::Validate => {
            println!("Validating database schema...");
            if validate_migrations(&pool).await? {
                println!("Database schema validation passed");
            } else {
                println!("Database schema has pending migrations");
                process::exit(1);
            }
        }
    }

    Ok(())
}

async fn handle_backend_command(command: BackendCommands, config: AppConfig) -> anyhow::Result<()> {
    let controller = Controller::connect(config).await?;

    match command {
        BackendCommands::List { names, output } => {
            let format: OutputFormat = output.parse()?;
            let filter =
                if names.is_empty() { BackendFilter::all() } else { BackendFilter::names(names) };
            let backends = controller.service.list_secret_backends(&filter, false).await?;
            match format {
                OutputFormat::Table => print_backends_table(&backends),
                OutputFormat::Json => {
                    let json = serde_json::to_string_pretty(&backends)
                        .context("Failed to serialize to JSON")?;
                    println!("{}", json);
                }
                OutputFormat::Yaml => {
                    let yaml =
                        serde_yaml::to_string(&backends).context("Failed to serialize to YAML")?;
                    println!("{}", yaml);
                }
            }
        }
    }

    Ok(())
}

/// Print migrations in a formatted table
fn print_migrations_table(migrations: &[MigrationInfo]) {
    println!();
    println!("{:<15} {:<50} {:<25} {:<10}", "Version", "Description", "Applied On", "Time (ms)");
    println!("{}", "-".repeat(100));

    for migration in migrations {
        println!(
            "{:<15} {:<50} {:<25} {:<10}",
            migration.version,
            truncate_string(&migration.description, 48),
            migration.installed_on.format("%Y-%m-%d %H:%M:%S"),
            migration.execution_time
        );
    }
    println!();
}

fn print_backends_table(backends: &[SecretBackendInfo]) {
    println!();
    println!("{:<24} {:<12} {:<8} {:<10} {:<40}", "Name", "Type", "Secrets", "Status", "Message");
    println!("{}", "-".repeat(96));

    for backend in backends {
        println!(
            "{:<24} {:<12} {:<8} {:<10} {:<40}",
            truncate_string(&backend.name, 22),
            backend.backend_type,
            backend.num_secrets,
            backend.status.as_str(),
            truncate_string(backend.message.as_deref().unwrap_or(""), 38)
        );
    }
    println!();
}

/// Truncate string to fit in table column
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
