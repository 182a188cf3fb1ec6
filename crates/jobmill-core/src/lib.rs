//! # jobmill-core
//!
//! Core crate for jobmill. Contains the unified error system, configuration
//! schemas, the [`Clock`](clock::Clock) abstraction used for every scheduling
//! decision, and the retry backoff policy.
//!
//! This crate has **no** internal dependencies on other jobmill crates.

pub mod clock;
pub mod config;
pub mod error;
pub mod result;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::AppError;
pub use result::AppResult;
