//! Named mutual-exclusion leases.

pub mod model;

pub use model::Lock;
