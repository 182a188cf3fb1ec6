//! Lock inspection commands.

use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};
use jobmill_core::error::AppError;
use jobmill_database::LockRepository;
use jobmill_database::store::LockStore;

/// Arguments for lock commands
#[derive(Debug, Args)]
pub struct LocksArgs {
    /// Lock subcommand
    #[command(subcommand)]
    pub command: LocksCommand,
}

/// Lock subcommands
#[derive(Debug, Subcommand)]
pub enum LocksCommand {
    /// List live leases
    List,
    /// Release a lease regardless of holder
    Release {
        /// Lock key
        key: String,
        /// Skip confirmation
        #[arg(long)]
        force: bool,
    },
    /// Delete expired lock rows
    Purge,
}

/// Lock display row
#[derive(Debug, Serialize, Tabled)]
struct LockRow {
    /// Key
    key: String,
    /// Acquired
    created_at: String,
    /// Expires
    expired_at: String,
}

/// Execute lock commands
pub async fn execute(
    args: &LocksArgs,
    config_path: &str,
    format: OutputFormat,
) -> Result<(), AppError> {
    let config = super::load_config(config_path)?;
    let pool = super::create_db_pool(&config).await?;
    let locks = LockRepository::new(pool, super::system_clock());

    match &args.command {
        LocksCommand::List => {
            let rows: Vec<LockRow> = locks
                .list()
                .await?
                .into_iter()
                .map(|lock| LockRow {
                    key: lock.key,
                    created_at: lock.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    expired_at: lock.expired_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                })
                .collect();

            output::print_list(&rows, format);
        }
        LocksCommand::Release { key, force } => {
            let prompt = format!("Release lock '{key}'? Its holder may still be working.");
            if !output::confirm(&prompt, *force)? {
                println!("Cancelled.");
                return Ok(());
            }
            locks.release(key).await?;
            tracing::info!(lock.key = %key, "Lock released by operator");
            output::print_success(&format!("Lock '{}' released", key));
        }
        LocksCommand::Purge => {
            let purged = locks.purge_expired().await?;
            tracing::debug!(purged, "Purged expired locks");
            output::print_success(&format!("Purged {} expired locks", purged));
        }
    }

    Ok(())
}
