//! Built-in job handler implementations.

pub mod maintenance;

pub use maintenance::{MAINTENANCE_JOB, MaintenanceJobHandler};
