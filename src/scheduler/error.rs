use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Job scheduler has been shut down")]
    ShutDown,
}
