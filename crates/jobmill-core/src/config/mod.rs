//! Application configuration schemas.
//!
//! All configuration structs are deserialized via the `config` crate from
//! TOML files plus `JOBMILL__`-prefixed environment variables. Each
//! sub-module represents a logical configuration section.

pub mod database;
pub mod logging;
pub mod maintenance;
pub mod retry;
pub mod worker;

use serde::{Deserialize, Serialize};

pub use self::database::DatabaseConfig;
pub use self::logging::LoggingConfig;
pub use self::maintenance::MaintenanceConfig;
pub use self::retry::{BackoffStrategy, RetryConfig};
pub use self::worker::WorkerConfig;

use crate::error::AppError;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database connection settings.
    pub database: DatabaseConfig,
    /// Scheduler loop settings.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Retry policy for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Built-in maintenance job settings.
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges `config/default.toml` with an environment-specific overlay
    /// and environment variables prefixed with `JOBMILL__`.
    pub fn load(env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("JOBMILL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        Self::finish(config)
    }

    /// Load configuration from a single file, still honouring environment overrides.
    pub fn load_file(path: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("JOBMILL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        Self::finish(config)
    }

    /// Parse configuration from an in-memory TOML document.
    pub fn from_toml(source: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?;

        Self::finish(config)
    }

    fn finish(config: config::Config) -> Result<Self, AppError> {
        let app: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;
        app.validate()?;
        tracing::debug!(queues = ?app.worker.queues, "Configuration loaded");
        Ok(app)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.worker.concurrency == 0 {
            return Err(AppError::configuration("worker.concurrency must be at least 1"));
        }
        if self.worker.queues.is_empty() || self.worker.queues.iter().any(|q| q.trim().is_empty()) {
            return Err(AppError::configuration(
                "worker.queues must list at least one non-empty queue name",
            ));
        }
        if self.worker.claim_staleness_seconds == 0 {
            return Err(AppError::configuration(
                "worker.claim_staleness_seconds must be greater than zero",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::configuration("retry.max_attempts must be at least 1"));
        }
        self.retry.backoff()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = AppConfig::from_toml(
            r#"
            [database]
            url = "postgres://jobmill@localhost/jobmill"
            "#,
        )
        .unwrap();

        assert_eq!(config.worker.queues, vec!["default".to_string()]);
        assert_eq!(config.worker.claim_staleness_seconds, 3600);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.strategy, BackoffStrategy::Exponential);
        assert_eq!(config.maintenance.frequency, "daily at 03:00");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_schedule_strategy() {
        let config = AppConfig::from_toml(
            r#"
            [database]
            url = "postgres://localhost/jobmill"

            [retry]
            max_attempts = 3
            strategy = "schedule"
            schedule_seconds = [10, 60, 600]
            "#,
        )
        .unwrap();

        let policy = config.retry.backoff().unwrap();
        assert_eq!(policy.delay(3), chrono::Duration::seconds(600));
    }

    #[test]
    fn test_rejects_zero_staleness() {
        let err = AppConfig::from_toml(
            r#"
            [database]
            url = "postgres://localhost/jobmill"

            [worker]
            claim_staleness_seconds = 0
            "#,
        )
        .unwrap_err();

        assert_eq!(err.kind, crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_rejects_empty_queue_list() {
        let err = AppConfig::from_toml(
            r#"
            [database]
            url = "postgres://localhost/jobmill"

            [worker]
            queues = []
            "#,
        )
        .unwrap_err();

        assert!(err.message.contains("worker.queues"));
    }
}
