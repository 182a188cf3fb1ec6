//! Convenience result type alias for jobmill.

use crate::error::AppError;

/// A specialized `Result` type for jobmill operations.
pub type AppResult<T> = Result<T, AppError>;
