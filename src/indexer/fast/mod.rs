//! AST-based indexer
//!
//! Parses changed translation units through the [`TranslationUnitParser`]
//! collaborator and merges the declarations into the project's fragment.
//! Parsing runs on the blocking pool; fragment mutation always happens under
//! the fragment's write lock.

pub mod parser;
pub mod scanner;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::delta::{DeltaJobMapper, enumerate_sources};
use super::progress::{IndexerProgress, ProgressTracker};
use super::{Indexer, IndexerContext, IndexerError};
use crate::fragment::{FragmentContent, FragmentProperties, IndexFragment};
use crate::scheduler::{IndexJob, JobState, JobStatus};
use crate::workspace::{ContentTypeClassifier, Project, ResourceDelta, ResourceEventKind};

pub use parser::{Ast, ParseError, ParseOptions, TranslationUnitParser};
pub use scanner::DeclarationScanner;

pub struct FastIndexer {
    project: Project,
    fragment: Arc<IndexFragment>,
    parser: Arc<dyn TranslationUnitParser>,
    classifier: Arc<dyn ContentTypeClassifier>,
    options: ParseOptions,
    progress: ProgressTracker,
}

impl FastIndexer {
    pub const ID: &'static str = "fast";

    pub fn new(context: &IndexerContext) -> Self {
        let services = &context.services;
        Self {
            project: context.project.clone(),
            fragment: Arc::new(IndexFragment::new(FragmentProperties::current(
                context.project.name(),
            ))),
            parser: Arc::clone(&services.parser),
            classifier: Arc::clone(&services.classifier),
            options: services.parse_options,
            progress: ProgressTracker::default(),
        }
    }

    /// Registry factory
    pub fn create(context: &IndexerContext) -> Result<Arc<dyn Indexer>, IndexerError> {
        Ok(Arc::new(Self::new(context)))
    }

    async fn parse(&self, path: &Path) -> Result<Option<Ast>, IndexerError> {
        let parser = Arc::clone(&self.parser);
        let project = self.project.clone();
        let path = path.to_path_buf();
        let options = self.options;
        let ast = tokio::task::spawn_blocking(move || parser.parse(&project, &path, &options))
            .await
            .map_err(|e| IndexerError::Task(e.to_string()))??;
        Ok(ast)
    }

    /// Merge an AST into the fragment, returning the number of files written
    fn merge(&self, content: &mut FragmentContent, ast: Ast) -> usize {
        let skip_headers = self.options.skips_indexed_headers();
        let mut written = 0;
        for file in ast.files {
            let is_unit = file.path == ast.translation_unit;
            if !is_unit && skip_headers && content.is_indexed(&file.path) {
                trace!("Header already indexed: {}", file.path.display());
                continue;
            }
            content.replace_file(file.path, file.symbols);
            written += 1;
        }
        written
    }

    async fn index_file(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<JobStatus, IndexerError> {
        if cancel.is_cancelled() {
            return Ok(JobStatus::Cancelled);
        }
        let Some(ast) = self.parse(path).await? else {
            trace!("Nothing to index in {}", path.display());
            return Ok(JobStatus::Completed);
        };
        let language = ast.language;
        let mut content = self.fragment.acquire_write().await?;
        let written = self.merge(&mut content, ast);
        debug!(
            "Indexed {} as {:?} ({} files written)",
            path.display(),
            language,
            written
        );
        Ok(JobStatus::Completed)
    }

    async fn remove_file(&self, path: &Path) -> Result<JobStatus, IndexerError> {
        let mut content = self.fragment.acquire_write().await?;
        if content.remove_file(path) {
            debug!("Removed {} from index", path.display());
        }
        Ok(JobStatus::Completed)
    }

    async fn remove_folder(&self, folder: &Path) -> Result<JobStatus, IndexerError> {
        let mut content = self.fragment.acquire_write().await?;
        content.remove_under(folder);
        Ok(JobStatus::Completed)
    }

    /// Rebuild the fragment from scratch while holding its write lock
    ///
    /// Readers observe either the old or the rebuilt content. A cancelled pass
    /// leaves the fragment empty.
    async fn rebuild(&self, cancel: &CancellationToken) -> Result<JobStatus, IndexerError> {
        let started = Instant::now();
        let mut content = self.fragment.acquire_write().await?;
        content.clear();

        let sources = enumerate_sources(self.project.location(), self.classifier.as_ref());
        info!(
            "Reindexing {} ({} translation units)",
            self.project.name(),
            sources.len()
        );
        for path in &sources {
            if cancel.is_cancelled() {
                content.clear();
                return Ok(JobStatus::Cancelled);
            }
            match self.parse(path).await {
                Ok(Some(ast)) => {
                    self.merge(&mut content, ast);
                }
                Ok(None) => trace!("Nothing to index in {}", path.display()),
                // One broken file does not fail the pass
                Err(e) => debug!("Skipping {} during reindex: {}", path.display(), e),
            }
        }
        crate::log_timing!(tracing::Level::INFO, "fast-reindex", started.elapsed());
        Ok(JobStatus::Completed)
    }
}

#[async_trait]
impl Indexer for FastIndexer {
    fn indexer_id(&self) -> &str {
        Self::ID
    }

    fn project(&self) -> &Project {
        &self.project
    }

    fn fragment(&self) -> Option<Arc<IndexFragment>> {
        Some(Arc::clone(&self.fragment))
    }

    fn add_resource_event(&self, delta: &ResourceDelta, kind: ResourceEventKind) -> Vec<IndexJob> {
        DeltaJobMapper::new(&self.project, self.classifier.as_ref()).added(delta, kind)
    }

    fn remove_resource_event(
        &self,
        delta: &ResourceDelta,
        kind: ResourceEventKind,
    ) -> Vec<IndexJob> {
        DeltaJobMapper::new(&self.project, self.classifier.as_ref()).removed(delta, kind)
    }

    async fn execute(
        &self,
        job: &IndexJob,
        cancel: &CancellationToken,
    ) -> Result<JobStatus, IndexerError> {
        match job {
            IndexJob::AddTranslationUnit { path, .. }
            | IndexJob::ChangeTranslationUnit { path, .. } => self.index_file(path, cancel).await,
            IndexJob::RemoveTranslationUnit { path, .. } => self.remove_file(path).await,
            IndexJob::RemoveFolder { path, .. } => self.remove_folder(path).await,
            IndexJob::Reindex { .. } | IndexJob::ChangeNotification { .. } => {
                self.rebuild(cancel).await
            }
        }
    }

    fn job_finished(&self, job: &IndexJob, outcome: &JobState) {
        self.progress.record(job, outcome);
    }

    fn progress(&self) -> IndexerProgress {
        self.progress.snapshot()
    }

    fn shutdown(&self) -> Result<(), IndexerError> {
        debug!("Closing fast index fragment of {}", self.project.name());
        self.fragment.close();
        Ok(())
    }
}
