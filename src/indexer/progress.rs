//! Job outcome bookkeeping per indexer

use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;
use tracing::warn;

use crate::scheduler::{IndexJob, JobState};

/// Counters describing what an indexer's jobs have done so far
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexerProgress {
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub cancelled_jobs: usize,
    /// Set when a full reindex was cut short and left the fragment incomplete
    pub needs_reindex: bool,
    pub last_error: Option<String>,
    pub last_updated: Option<SystemTime>,
}

#[derive(Debug, Default)]
pub struct ProgressTracker {
    state: Mutex<IndexerProgress>,
}

impl ProgressTracker {
    pub fn record(&self, job: &IndexJob, outcome: &JobState) {
        let mut progress = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let full_pass = job.is_full_pass();
        match outcome {
            JobState::Completed => {
                progress.completed_jobs += 1;
                if full_pass {
                    progress.needs_reindex = false;
                }
            }
            JobState::Cancelled => {
                progress.cancelled_jobs += 1;
                if full_pass {
                    warn!(
                        "Full index pass for {} was cancelled; the index stays incomplete until the next reindex",
                        job.project().name()
                    );
                    progress.needs_reindex = true;
                }
            }
            JobState::Failed(reason) => {
                progress.failed_jobs += 1;
                progress.last_error = Some(reason.clone());
            }
            JobState::Waiting | JobState::Running => return,
        }
        progress.last_updated = Some(SystemTime::now());
    }

    pub fn snapshot(&self) -> IndexerProgress {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
