//! Indexer that keeps no index

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{Indexer, IndexerContext, IndexerError};
use crate::fragment::IndexFragment;
use crate::scheduler::{IndexJob, JobStatus};
use crate::workspace::{Project, ResourceDelta, ResourceEventKind};

/// Selected for projects that opt out of indexing; produces no jobs and no fragment
pub struct NullIndexer {
    project: Project,
}

impl NullIndexer {
    pub const ID: &'static str = "null";

    pub fn new(project: Project) -> Self {
        Self { project }
    }

    pub fn create(context: &IndexerContext) -> Result<Arc<dyn Indexer>, IndexerError> {
        Ok(Arc::new(Self::new(context.project.clone())))
    }
}

#[async_trait]
impl Indexer for NullIndexer {
    fn indexer_id(&self) -> &str {
        Self::ID
    }

    fn project(&self) -> &Project {
        &self.project
    }

    fn fragment(&self) -> Option<Arc<IndexFragment>> {
        None
    }

    fn add_resource_event(&self, _delta: &ResourceDelta, _kind: ResourceEventKind) -> Vec<IndexJob> {
        Vec::new()
    }

    fn remove_resource_event(
        &self,
        _delta: &ResourceDelta,
        _kind: ResourceEventKind,
    ) -> Vec<IndexJob> {
        Vec::new()
    }

    async fn execute(
        &self,
        job: &IndexJob,
        _cancel: &CancellationToken,
    ) -> Result<JobStatus, IndexerError> {
        trace!("Null indexer ignoring {}", job);
        Ok(JobStatus::Completed)
    }
}
