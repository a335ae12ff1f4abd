//! Test utilities and global setup
//!
//! Provides centralized test logging configuration plus recording doubles for
//! the scheduler and index manager tests.

/// Test logging utilities
#[cfg(all(test, feature = "test-logging"))]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize test logging globally - safe to call multiple times
    ///
    /// Respects `RUST_LOG`, writes through the test writer and ignores a
    /// subscriber installed by another test.
    ///
    /// ```bash
    /// RUST_LOG=cindex::scheduler=trace cargo test --features test-logging
    /// ```
    pub fn init() {
        INIT.call_once(|| {
            let env_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("debug,tokio=info"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true)
                .compact()
                .try_init()
                .ok();
        });
    }
}

/// Install test logging for the whole test binary
#[cfg(all(test, feature = "test-logging"))]
#[macro_export]
macro_rules! setup_test_logging {
    () => {
        #[ctor::ctor]
        fn init_test_logging() {
            $crate::test_utils::logging::init();
        }
    };
}

#[cfg(all(test, feature = "test-logging"))]
setup_test_logging!();

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::fragment::{FragmentProperties, IndexFragment};
use crate::indexer::delta::DeltaJobMapper;
use crate::indexer::registry::IndexerFactory;
use crate::indexer::{Indexer, IndexerContext, IndexerError};
use crate::scheduler::{IndexJob, JobListener, JobState, JobStatus};
use crate::workspace::{ExtensionClassifier, Project, ResourceDelta, ResourceEventKind};

/// Indexer double that records every call it receives
pub struct RecordingIndexer {
    id: String,
    project: Project,
    fragment: Arc<IndexFragment>,
    classifier: ExtensionClassifier,
    failing: HashSet<PathBuf>,
    panicking: HashSet<PathBuf>,
    delay: Option<Duration>,
    fail_idle: bool,
    executed: Mutex<Vec<IndexJob>>,
    finished: Mutex<Vec<(IndexJob, JobState)>>,
    idle_calls: AtomicUsize,
    shutdowns: AtomicUsize,
    change_notifications: AtomicUsize,
}

impl RecordingIndexer {
    pub fn new(project: Project) -> Self {
        Self {
            id: "recording".to_string(),
            fragment: Arc::new(IndexFragment::new(FragmentProperties::current(
                project.name(),
            ))),
            project,
            classifier: ExtensionClassifier::new(),
            failing: HashSet::new(),
            panicking: HashSet::new(),
            delay: None,
            fail_idle: false,
            executed: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
            idle_calls: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
            change_notifications: AtomicUsize::new(0),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn failing_on(mut self, path: &str) -> Self {
        self.failing.insert(PathBuf::from(path));
        self
    }

    pub fn panicking_on(mut self, path: &str) -> Self {
        self.panicking.insert(PathBuf::from(path));
        self
    }

    /// Every job takes this long unless cancelled
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_idle(mut self) -> Self {
        self.fail_idle = true;
        self
    }

    pub fn executed(&self) -> Vec<IndexJob> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn finished(&self) -> Vec<(IndexJob, JobState)> {
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn idle_calls(&self) -> usize {
        self.idle_calls.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn change_notifications(&self) -> usize {
        self.change_notifications.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Indexer for RecordingIndexer {
    fn indexer_id(&self) -> &str {
        &self.id
    }

    fn project(&self) -> &Project {
        &self.project
    }

    fn fragment(&self) -> Option<Arc<IndexFragment>> {
        Some(Arc::clone(&self.fragment))
    }

    fn add_resource_event(&self, delta: &ResourceDelta, kind: ResourceEventKind) -> Vec<IndexJob> {
        DeltaJobMapper::new(&self.project, &self.classifier).added(delta, kind)
    }

    fn remove_resource_event(
        &self,
        delta: &ResourceDelta,
        kind: ResourceEventKind,
    ) -> Vec<IndexJob> {
        DeltaJobMapper::new(&self.project, &self.classifier).removed(delta, kind)
    }

    async fn execute(
        &self,
        job: &IndexJob,
        cancel: &CancellationToken,
    ) -> Result<JobStatus, IndexerError> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(job.clone());
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Ok(JobStatus::Cancelled),
            }
        }
        if let Some(path) = job.path() {
            if self.panicking.contains(path) {
                panic!("recording indexer told to panic on {}", path.display());
            }
            if self.failing.contains(path) {
                return Err(IndexerError::Failed {
                    id: self.id.clone(),
                    reason: format!("told to fail on {}", path.display()),
                });
            }
        }
        Ok(JobStatus::Completed)
    }

    async fn notify_indexer_change(&self) -> Result<(), IndexerError> {
        self.change_notifications.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn job_finished(&self, job: &IndexJob, outcome: &JobState) {
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((job.clone(), outcome.clone()));
    }

    fn notify_idle(&self, _idle_for: Duration) -> Result<(), IndexerError> {
        self.idle_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_idle {
            return Err(IndexerError::Failed {
                id: self.id.clone(),
                reason: "idle hook failed".to_string(),
            });
        }
        Ok(())
    }

    fn preferences_changed(&self, key: &str) -> Vec<IndexJob> {
        if key.starts_with("recording.") {
            vec![IndexJob::Reindex {
                project: self.project.clone(),
            }]
        } else {
            Vec::new()
        }
    }

    fn shutdown(&self) -> Result<(), IndexerError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.fragment.close();
        Ok(())
    }
}

/// Registry factory that hands out [`RecordingIndexer`]s and keeps them
#[derive(Clone, Default)]
pub struct RecordingFactory {
    created: Arc<Mutex<Vec<Arc<RecordingIndexer>>>>,
    failing_idle: Arc<HashSet<String>>,
    delay: Option<Duration>,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexers for the named projects fail their idle hook
    pub fn failing_idle_for(mut self, projects: &[&str]) -> Self {
        self.failing_idle = Arc::new(projects.iter().map(|p| p.to_string()).collect());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn factory(&self, id: &str) -> IndexerFactory {
        let this = self.clone();
        let id = id.to_string();
        Arc::new(
            move |context: &IndexerContext| -> Result<Arc<dyn Indexer>, IndexerError> {
                let mut indexer = RecordingIndexer::new(context.project.clone()).with_id(&id);
                if this.failing_idle.contains(context.project.name()) {
                    indexer = indexer.failing_idle();
                }
                if let Some(delay) = this.delay {
                    indexer = indexer.with_delay(delay);
                }
                let indexer = Arc::new(indexer);
                this.created
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(Arc::clone(&indexer));
                Ok(indexer)
            },
        )
    }

    pub fn created(&self) -> Vec<Arc<RecordingIndexer>> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn created_for(&self, project: &Project) -> Vec<Arc<RecordingIndexer>> {
        self.created()
            .into_iter()
            .filter(|indexer| indexer.project() == project)
            .collect()
    }
}

/// Scheduler listener double
#[derive(Default)]
pub struct RecordingListener {
    finished: Mutex<Vec<(IndexJob, JobState)>>,
    idle: AtomicUsize,
}

impl RecordingListener {
    pub fn finished(&self) -> Vec<(IndexJob, JobState)> {
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn idle_notifications(&self) -> usize {
        self.idle.load(Ordering::SeqCst)
    }
}

impl JobListener for RecordingListener {
    fn job_finished(&self, job: &IndexJob, outcome: &JobState) {
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((job.clone(), outcome.clone()));
    }

    fn notify_idle(&self, _idle_for: Duration) {
        self.idle.fetch_add(1, Ordering::SeqCst);
    }
}
