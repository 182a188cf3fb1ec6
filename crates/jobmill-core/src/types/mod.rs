//! Shared value types.

pub mod backoff;

pub use backoff::BackoffPolicy;
