//! Indexer back-ends
//!
//! An indexer owns one project's fragment. It turns resource deltas into
//! [`IndexJob`]s and executes those jobs when the scheduler hands them back.
//! Back-ends are created through the [`IndexerRegistry`] by id.

pub mod ctags;
pub mod delta;
pub mod error;
pub mod fast;
pub mod null;
pub mod progress;
pub mod registry;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::fragment::IndexFragment;
use crate::preferences::Preferences;
use crate::scheduler::{IndexJob, JobState, JobStatus};
use crate::workspace::{ContentTypeClassifier, Project, ResourceDelta, ResourceEventKind};

pub use ctags::CtagsIndexer;
pub use error::IndexerError;
pub use fast::{FastIndexer, ParseOptions, TranslationUnitParser};
pub use null::NullIndexer;
pub use progress::IndexerProgress;
pub use registry::IndexerRegistry;

/// Per-project indexing back-end
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Registry id of the back-end that created this indexer
    fn indexer_id(&self) -> &str;

    fn project(&self) -> &Project;

    /// The writable fragment this indexer maintains, if it keeps one
    fn fragment(&self) -> Option<Arc<IndexFragment>>;

    /// Translate an added/changed resource delta into jobs
    fn add_resource_event(
        &self,
        delta: &ResourceDelta,
        kind: ResourceEventKind,
    ) -> Vec<IndexJob>;

    /// Translate a delta describing resources about to disappear into jobs
    fn remove_resource_event(
        &self,
        delta: &ResourceDelta,
        kind: ResourceEventKind,
    ) -> Vec<IndexJob>;

    /// Run one job; cancellation is reported as `JobStatus::Cancelled`, not as an error
    async fn execute(
        &self,
        job: &IndexJob,
        cancel: &CancellationToken,
    ) -> Result<JobStatus, IndexerError>;

    /// Called on a background task after this indexer replaced a previous one
    async fn notify_indexer_change(&self) -> Result<(), IndexerError> {
        Ok(())
    }

    fn job_finished(&self, _job: &IndexJob, _outcome: &JobState) {}

    fn notify_idle(&self, _idle_for: Duration) -> Result<(), IndexerError> {
        Ok(())
    }

    /// Jobs to schedule after a preference of this project changed
    fn preferences_changed(&self, _key: &str) -> Vec<IndexJob> {
        Vec::new()
    }

    fn progress(&self) -> IndexerProgress {
        IndexerProgress::default()
    }

    fn shutdown(&self) -> Result<(), IndexerError> {
        Ok(())
    }
}

/// Services shared by every indexer the manager creates
#[derive(Clone)]
pub struct IndexerServices {
    pub preferences: Preferences,
    pub classifier: Arc<dyn ContentTypeClassifier>,
    pub parser: Arc<dyn TranslationUnitParser>,
    /// Directory for back-end owned files such as internal tag files
    pub state_dir: PathBuf,
    pub parse_options: ParseOptions,
}

impl IndexerServices {
    pub fn context_for(&self, project: &Project) -> IndexerContext {
        IndexerContext {
            project: project.clone(),
            services: self.clone(),
        }
    }
}

/// Everything a factory needs to build an indexer for one project
#[derive(Clone)]
pub struct IndexerContext {
    pub project: Project,
    pub services: IndexerServices,
}
