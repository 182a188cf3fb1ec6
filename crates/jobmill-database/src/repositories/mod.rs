//! PostgreSQL store implementations.

pub mod job;
pub mod lock;

pub use job::JobRepository;
pub use lock::LockRepository;
