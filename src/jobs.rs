//! Asynchronous video jobs: submission, status and progress.

mod manager;
mod progress;

pub use manager::{JobManager, JobTicket};
pub use progress::{JobRecord, JobStatus, ProgressReport, ProgressReporter, ProgressStore};

pub type JobId = uuid::Uuid;
