//! Background job domain entities.

pub mod frequency;
pub mod model;
pub mod outcome;

pub use frequency::Frequency;
pub use model::{DEFAULT_QUEUE, Job, JobId, NewJob};
pub use outcome::{Completion, FailureOutcome, JobFilter, JobState, JobStats};
