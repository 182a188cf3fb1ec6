//! # jobmill-database
//!
//! Persistence for the two jobmill tables. [`JobStore`] and [`LockStore`]
//! are the only way the engine touches state; they are implemented for
//! PostgreSQL (the system of record, shared by every worker process) and
//! in memory (single-process embedding and tests).

pub mod connection;
pub mod memory;
pub mod migration;
pub mod repositories;
pub mod store;

pub use connection::DatabasePool;
pub use memory::{MemoryJobStore, MemoryLockStore};
pub use repositories::{JobRepository, LockRepository};
pub use store::{JobStore, LockStore};
