//! In-process store implementations.
//!
//! These give the same guarantees as the PostgreSQL stores within a single
//! process: claims are serialized by one mutex, leases by per-key map
//! entries. They are used to embed the engine without a database and to
//! drive it deterministically in tests.

pub mod job;
pub mod lock;

pub use job::MemoryJobStore;
pub use lock::MemoryLockStore;
