//! Background job execution for jobmill.
//!
//! This crate provides:
//! - A handler registry and executor that dispatches jobs by name
//! - A queue facade for producers and operators
//! - A worker runner that claims due jobs and writes outcomes back
//! - A lease helper for handlers that need cross-process exclusivity
//! - The built-in maintenance job

pub mod executor;
pub mod jobs;
pub mod lease;
pub mod queue;
pub mod runner;

pub use executor::{JobExecutionError, JobExecutor, JobHandler};
pub use queue::JobQueue;
pub use runner::{RetryPolicy, RunOutcome, WorkerRunner};
