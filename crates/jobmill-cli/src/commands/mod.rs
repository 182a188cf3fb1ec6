//! CLI command definitions and dispatch.

pub mod jobs;
pub mod locks;
pub mod migrate;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::output::OutputFormat;
use jobmill_core::clock::{Clock, SystemClock};
use jobmill_core::config::AppConfig;
use jobmill_core::error::AppError;

/// jobmill: durable background jobs on PostgreSQL
#[derive(Debug, Parser)]
#[command(name = "jobmill", version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Database migration management
    Migrate(migrate::MigrateArgs),
    /// Inspect and operate on jobs
    Jobs(jobs::JobsArgs),
    /// Inspect and release locks
    Locks(locks::LocksArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<(), AppError> {
        tracing::debug!(command = ?self.command, config = %self.config, "Executing command");
        match &self.command {
            Commands::Migrate(args) => migrate::execute(args, &self.config, self.format).await,
            Commands::Jobs(args) => jobs::execute(args, &self.config, self.format).await,
            Commands::Locks(args) => locks::execute(args, &self.config, self.format).await,
        }
    }
}

/// Helper: load configuration from file
pub fn load_config(config_path: &str) -> Result<AppConfig, AppError> {
    tracing::debug!(path = config_path, "Loading configuration");
    AppConfig::load_file(config_path).inspect_err(|e| {
        tracing::debug!(path = config_path, error = %e, "Configuration rejected");
    })
}

/// Helper: create database pool from config
pub async fn create_db_pool(config: &AppConfig) -> Result<sqlx::PgPool, AppError> {
    let pool = jobmill_database::DatabasePool::connect(&config.database).await?;
    if !pool.health_check().await? {
        return Err(AppError::service_unavailable(
            "Database health check returned an unexpected result",
        ));
    }
    Ok(pool.into_pool())
}

/// Helper: the wall clock shared by the stores a command opens
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobmill_core::error::ErrorKind;

    #[test]
    fn test_load_config_reads_workspace_defaults() {
        let config = load_config("../../config/default.toml").unwrap();
        assert!(!config.worker.queues.is_empty());
    }

    #[test]
    fn test_load_config_missing_file_is_configuration_error() {
        let err = load_config("no/such/jobmill.toml").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }
}
