//! Background job scheduling
//!
//! Jobs are queued per indexer and executed on a small pool of tokio worker
//! tasks. The scheduler reports every finished job and periodic idleness to a
//! [`JobListener`], which the index manager implements.

pub mod error;
pub mod job;
#[allow(clippy::module_inception)]
pub mod scheduler;

pub use error::SchedulerError;
pub use job::{IndexJob, JobHandle, JobId, JobInfo, JobState, JobStatus};
pub use scheduler::{JobListener, JobScheduler, SchedulerConfig};
