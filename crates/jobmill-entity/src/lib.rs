//! # jobmill-entity
//!
//! Domain models for jobmill. [`Job`](job::Job) and [`Lock`](lock::Lock)
//! mirror the two persisted tables and derive `sqlx::FromRow`; the planning
//! logic shared by every store implementation (recurrence re-arming and
//! failure accounting) lives on the models so it is written once.

pub mod job;
pub mod lock;
