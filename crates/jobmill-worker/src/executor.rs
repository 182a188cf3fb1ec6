//! Job executor: dispatches jobs to registered handlers.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing;

use jobmill_core::error::AppError;
use jobmill_entity::job::Job;

/// Trait for job handler implementations.
///
/// Delivery is at-least-once: a job whose worker died mid-run is executed
/// again once its claim goes stale, so handlers must tolerate repeats.
#[async_trait]
pub trait JobHandler: Send + Sync + std::fmt::Debug {
    /// The job name this handler processes.
    fn name(&self) -> &str;

    /// Execute the job.
    async fn execute(&self, job: &Job) -> Result<(), JobExecutionError>;
}

/// Error from job execution
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// Permanent failure, do not retry
    #[error("Permanent job failure: {0}")]
    Permanent(String),

    /// Transient failure, may retry
    #[error("Transient job failure: {0}")]
    Transient(String),

    /// No handler is registered under the job's name
    #[error("No handler registered for job '{0}'")]
    UnknownHandler(String),

    /// The handler panicked
    #[error("Job handler panicked: {0}")]
    Panicked(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] AppError),
}

impl JobExecutionError {
    /// Shorthand for a transient failure.
    pub fn transient(message: impl std::fmt::Display) -> Self {
        Self::Transient(message.to_string())
    }

    /// Shorthand for a permanent failure.
    pub fn permanent(message: impl std::fmt::Display) -> Self {
        Self::Permanent(message.to_string())
    }

    /// Whether the retry policy applies to this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Panicked(_) | Self::Internal(_)
        )
    }
}

/// Dispatches jobs to the appropriate handler based on the job name.
///
/// Handlers are registered while the process starts; the executor is then
/// shared behind an `Arc` and never changes.
#[derive(Debug, Default)]
pub struct JobExecutor {
    /// Registered job handlers by name
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobExecutor {
    /// Create a new job executor
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job handler, replacing any handler with the same name.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        let name = handler.name().to_string();
        tracing::info!(job.name = %name, "Registered job handler");
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::warn!(job.name = %name, "Replaced an existing job handler");
        }
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Execute a job by dispatching to the correct handler.
    ///
    /// A panicking handler is reported as [`JobExecutionError::Panicked`]
    /// instead of unwinding into the worker loop.
    pub async fn execute(&self, job: &Job) -> Result<(), JobExecutionError> {
        let handler = self
            .handlers
            .get(&job.name)
            .ok_or_else(|| JobExecutionError::UnknownHandler(job.name.clone()))?;

        tracing::debug!(
            job.id = %job.id,
            job.name = %job.name,
            attempt = job.number_attempts,
            "Executing job"
        );

        AssertUnwindSafe(handler.execute(job))
            .catch_unwind()
            .await
            .map_err(|panic| JobExecutionError::Panicked(panic_message(&*panic)))?
    }

    /// Check if a handler is registered for a job name
    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Get the registered job names, sorted
    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
