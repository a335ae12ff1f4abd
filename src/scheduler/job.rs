//! Index jobs and their lifecycle

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use uuid::Uuid;

use crate::workspace::Project;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One unit of indexing work, immutable once enqueued
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexJob {
    AddTranslationUnit { project: Project, path: PathBuf },
    ChangeTranslationUnit { project: Project, path: PathBuf },
    RemoveTranslationUnit { project: Project, path: PathBuf },
    /// Drop every indexed file under a removed folder
    RemoveFolder { project: Project, path: PathBuf },
    /// Clear the fragment and index every eligible file again
    Reindex { project: Project },
    /// The project's indexer configuration changed; rebuild with the new one
    ChangeNotification { project: Project },
}

impl IndexJob {
    pub fn project(&self) -> &Project {
        match self {
            Self::AddTranslationUnit { project, .. }
            | Self::ChangeTranslationUnit { project, .. }
            | Self::RemoveTranslationUnit { project, .. }
            | Self::RemoveFolder { project, .. }
            | Self::Reindex { project }
            | Self::ChangeNotification { project } => project,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::AddTranslationUnit { path, .. }
            | Self::ChangeTranslationUnit { path, .. }
            | Self::RemoveTranslationUnit { path, .. }
            | Self::RemoveFolder { path, .. } => Some(path),
            Self::Reindex { .. } | Self::ChangeNotification { .. } => None,
        }
    }

    /// Change notifications jump ahead of queued work, which they invalidate
    pub fn wants_front_of_queue(&self) -> bool {
        matches!(self, Self::ChangeNotification { .. })
    }

    /// Whether the job rebuilds the whole fragment
    pub fn is_full_pass(&self) -> bool {
        matches!(self, Self::Reindex { .. } | Self::ChangeNotification { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::AddTranslationUnit { .. } => "add",
            Self::ChangeTranslationUnit { .. } => "change",
            Self::RemoveTranslationUnit { .. } => "remove",
            Self::RemoveFolder { .. } => "remove-folder",
            Self::Reindex { .. } => "reindex",
            Self::ChangeNotification { .. } => "change-notification",
        }
    }
}

impl fmt::Display for IndexJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.path() {
            Some(path) => write!(
                f,
                "{} {} [{}]",
                self.label(),
                path.display(),
                self.project().name()
            ),
            None => write!(f, "{} [{}]", self.label(), self.project().name()),
        }
    }
}

/// Scheduler-side state of a job: `Waiting → Running → {Completed, Cancelled, Failed}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Waiting,
    Running,
    Completed,
    Cancelled,
    Failed(String),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed(_))
    }
}

/// Successful result of executing a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Completed,
    Cancelled,
}

/// Monitoring view of a queued or running job
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub id: JobId,
    pub job: IndexJob,
    pub state: JobState,
    pub enqueued_at: DateTime<Utc>,
}

/// Caller-side handle to a requested job
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    state: watch::Receiver<JobState>,
}

impl JobHandle {
    pub(crate) fn new(id: JobId, state: watch::Receiver<JobState>) -> Self {
        Self { id, state }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn state(&self) -> JobState {
        self.state.borrow().clone()
    }

    /// Wait for the job to reach a terminal state
    pub async fn wait(mut self) -> JobState {
        match self.state.wait_for(JobState::is_terminal).await {
            Ok(state) => state.clone(),
            // The scheduler dropped the job without finishing it
            Err(_) => JobState::Cancelled,
        }
    }
}
