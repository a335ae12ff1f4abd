//! Index manager
//!
//! Owns the project to indexer map, routes workspace events to the right
//! indexer, and proxies scheduler queries. The map is guarded by a
//! [`ReadWriteMonitor`]; it is only held to look up or swap indexers and is
//! always released before any fragment lock is taken or any `.await`.

pub mod error;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{
    Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::config::ManagerConfig;
use crate::fragment::{IndexFragment, IndexedSymbol};
use crate::indexer::fast::DeclarationScanner;
use crate::indexer::{Indexer, IndexerProgress, IndexerRegistry, IndexerServices};
use crate::monitor::ReadWriteMonitor;
use crate::preferences::{Preferences, keys};
use crate::provider::FragmentProviderManager;
use crate::scheduler::{
    IndexJob, JobHandle, JobId, JobInfo, JobListener, JobScheduler, JobState, SchedulerError,
};
use crate::workspace::{
    ChangeKind, Project, ProjectConfig, ResourceDelta, ResourceEventKind,
};

pub use error::ManagerError;

type IndexerMap = HashMap<Project, Arc<dyn Indexer>>;

pub struct IndexManager {
    /// Orders access to `indexers`
    monitor: ReadWriteMonitor,
    indexers: RwLock<IndexerMap>,
    registry: IndexerRegistry,
    services: IndexerServices,
    configured_default: String,
    default_indexer: RwLock<String>,
    scheduler: Arc<JobScheduler>,
    providers: Arc<FragmentProviderManager>,
    shut_down: AtomicBool,
}

impl IndexManager {
    pub fn new(
        config: &ManagerConfig,
        registry: IndexerRegistry,
        services: IndexerServices,
        providers: Arc<FragmentProviderManager>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let listener: Weak<dyn JobListener> = this.clone();
            Self {
                monitor: ReadWriteMonitor::new(),
                indexers: RwLock::new(HashMap::new()),
                registry,
                services,
                configured_default: config.default_indexer.clone(),
                default_indexer: RwLock::new(config.default_indexer.clone()),
                scheduler: Arc::new(JobScheduler::new(config.scheduler.clone(), listener)),
                providers,
                shut_down: AtomicBool::new(false),
            }
        })
    }

    /// Wire up a manager for a workspace rooted at `root`
    pub fn from_config(
        config: &ManagerConfig,
        root: &Path,
        preferences: Preferences,
    ) -> Result<Arc<Self>, ManagerError> {
        let registry = config.registry()?;
        let classifier = Arc::new(config.classifier());
        let parser = Arc::new(DeclarationScanner::new(classifier.clone())?);
        let services = IndexerServices {
            preferences,
            classifier,
            parser,
            state_dir: config.state_dir_for(root),
            parse_options: config.parse_options,
        };
        let providers = Arc::new(FragmentProviderManager::new(config.compatibility()));
        providers.startup(&config.provider_registrations());
        Ok(Self::new(config, registry, services, providers))
    }

    /// Start the scheduler workers; needs a tokio runtime
    pub fn start(&self) {
        self.scheduler.start();
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    pub fn providers(&self) -> &Arc<FragmentProviderManager> {
        &self.providers
    }

    pub fn preferences(&self) -> &Preferences {
        &self.services.preferences
    }

    fn map(&self) -> RwLockReadGuard<'_, IndexerMap> {
        self.indexers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn map_mut(&self) -> RwLockWriteGuard<'_, IndexerMap> {
        self.indexers.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, project: &Project) -> Option<Arc<dyn Indexer>> {
        self.map().get(project).cloned()
    }

    pub fn default_indexer(&self) -> String {
        self.default_indexer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Change the indexer id used for projects without a preference
    pub fn set_default_indexer(&self, id: &str) {
        *self
            .default_indexer
            .write()
            .unwrap_or_else(PoisonError::into_inner) = id.to_string();
    }

    /// The project's indexer, created on first use
    ///
    /// Concurrent callers always get the same instance. `None` means indexing
    /// is disabled for the project: its configured indexer id is unknown or
    /// creation failed, or the manager is shut down.
    pub fn get_indexer_for_project(&self, project: &Project) -> Option<Arc<dyn Indexer>> {
        {
            let _read = self.monitor.read();
            if let Some(indexer) = self.lookup(project) {
                return Some(indexer);
            }
        }

        let write = self.monitor.write();
        let indexer = match self.lookup(project) {
            Some(existing) => Some(existing),
            None if self.shut_down.load(Ordering::SeqCst) => None,
            None => self.create_indexer(project).inspect(|indexer| {
                self.map_mut().insert(project.clone(), Arc::clone(indexer));
            }),
        };
        let _read = write.downgrade();
        indexer
    }

    /// The project's indexer if one exists; never creates one
    pub fn existing_indexer(&self, project: &Project) -> Option<Arc<dyn Indexer>> {
        let _read = self.monitor.read();
        self.lookup(project)
    }

    fn create_indexer(&self, project: &Project) -> Option<Arc<dyn Indexer>> {
        let id = self
            .services
            .preferences
            .indexer_id(project)
            .unwrap_or_else(|| self.default_indexer());
        match self
            .registry
            .create(&id, &self.services.context_for(project))
        {
            Ok(indexer) => {
                info!("Created {} indexer for project {}", id, project.name());
                Some(indexer)
            }
            Err(e) => {
                warn!("No indexer for project {}: {}", project.name(), e);
                None
            }
        }
    }

    /// Projects that currently have an indexer
    pub fn projects(&self) -> Vec<Project> {
        let _read = self.monitor.read();
        let mut projects: Vec<Project> = self.map().keys().cloned().collect();
        projects.sort();
        projects
    }

    fn live_indexers(&self) -> Vec<Arc<dyn Indexer>> {
        let _read = self.monitor.read();
        self.map().values().cloned().collect()
    }

    fn schedule(&self, indexer: &Arc<dyn Indexer>, jobs: Vec<IndexJob>) -> Vec<JobHandle> {
        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            match self.scheduler.request(job, Arc::clone(indexer)) {
                Ok(handle) => handles.push(handle),
                Err(SchedulerError::ShutDown) => {
                    debug!("Scheduler is shut down; dropping remaining jobs");
                    break;
                }
            }
        }
        handles
    }

    /// Route an added/changed resource delta to the project's indexer
    pub fn add_resource_event(
        &self,
        project: &Project,
        delta: &ResourceDelta,
        kind: ResourceEventKind,
    ) -> Vec<JobHandle> {
        let Some(indexer) = self.get_indexer_for_project(project) else {
            trace!("Indexing disabled for {}; ignoring delta", project.name());
            return Vec::new();
        };
        let jobs = indexer.add_resource_event(delta, kind);
        self.schedule(&indexer, jobs)
    }

    /// Route a removal delta; never creates an indexer
    ///
    /// A delta that removes the project itself drops the project's jobs,
    /// indexer and provider cache entries.
    pub fn remove_resource_event(
        &self,
        project: &Project,
        delta: &ResourceDelta,
        kind: ResourceEventKind,
    ) -> Vec<JobHandle> {
        let removes_project = delta
            .removed_projects()
            .iter()
            .any(|location| location == project.location());
        if removes_project && kind == ResourceEventKind::PostChange {
            self.project_removed(project);
            return Vec::new();
        }
        let Some(indexer) = self.existing_indexer(project) else {
            trace!("No indexer for {}; ignoring removal", project.name());
            return Vec::new();
        };
        let jobs = indexer.remove_resource_event(delta, kind);
        self.schedule(&indexer, jobs)
    }

    /// Drop everything kept for a project that left the workspace
    pub fn project_removed(&self, project: &Project) {
        let evicted = {
            let _write = self.monitor.write();
            self.scheduler.discard_jobs(project);
            self.map_mut().remove(project)
        };
        if let Some(indexer) = evicted {
            info!("Project {} removed; dropping its indexer", project.name());
            if let Err(e) = indexer.shutdown() {
                warn!("Indexer of {} failed to shut down: {}", project.name(), e);
            }
        }
        self.providers.project_removed(project);
    }

    /// Workspace-wide delta: projects removed anywhere in the tree are dropped
    pub fn element_changed(&self, delta: &ResourceDelta) {
        let removed = delta.removed_projects();
        if removed.is_empty() {
            return;
        }
        let projects: Vec<Project> = self
            .projects()
            .into_iter()
            .filter(|project| removed.iter().any(|path| path == project.location()))
            .collect();
        for project in &projects {
            self.project_removed(project);
        }
        self.providers.element_changed(delta);
    }

    /// The project's indexer configuration changed
    ///
    /// Queued jobs of the project are discarded and its indexer evicted while
    /// holding the monitor. The replacement is created right away, told about
    /// the change, and handed a change-notification job whose handle is
    /// returned.
    pub async fn indexer_change_notification(&self, project: &Project) -> Option<JobHandle> {
        let evicted = {
            let _write = self.monitor.write();
            let discarded = self.scheduler.discard_jobs(project);
            debug!(
                "Indexer change for {}: discarded {} jobs",
                project.name(),
                discarded
            );
            self.map_mut().remove(project)
        };
        if let Some(old) = evicted {
            if let Err(e) = old.shutdown() {
                warn!(
                    "Replaced indexer of {} failed to shut down: {}",
                    project.name(),
                    e
                );
            }
        }

        let indexer = self.get_indexer_for_project(project)?;
        if let Err(e) = indexer.notify_indexer_change().await {
            warn!(
                "Indexer change notification failed for {}: {}",
                project.name(),
                e
            );
        }
        let job = IndexJob::ChangeNotification {
            project: project.clone(),
        };
        match self.scheduler.request(job, indexer) {
            Ok(handle) => Some(handle),
            Err(e) => {
                debug!("Change notification not scheduled: {}", e);
                None
            }
        }
    }

    /// React to a changed preference of one project
    pub async fn preference_changed(&self, project: &Project, key: &str) -> Vec<JobHandle> {
        if key == keys::INDEXER_ID {
            return self
                .indexer_change_notification(project)
                .await
                .into_iter()
                .collect();
        }
        let Some(indexer) = self.existing_indexer(project) else {
            return Vec::new();
        };
        let jobs = indexer.preferences_changed(key);
        self.schedule(&indexer, jobs)
    }

    /// React to a changed workspace preference; applies to every live project
    pub async fn workspace_preference_changed(&self, key: &str) -> Vec<JobHandle> {
        let mut handles = Vec::new();
        for project in self.projects() {
            handles.extend(self.preference_changed(&project, key).await);
        }
        handles
    }

    /// Tell every live indexer that the scheduler has been idle
    ///
    /// Returns the number of indexers notified; a failing indexer does not
    /// stop the broadcast.
    pub fn notify_idle(&self, idle_for: Duration) -> usize {
        let _read = self.monitor.read();
        let indexers: Vec<Arc<dyn Indexer>> = self.map().values().cloned().collect();
        for indexer in &indexers {
            if let Err(e) = indexer.notify_idle(idle_for) {
                warn!(
                    "Idle notification failed for {}: {}",
                    indexer.project().name(),
                    e
                );
            }
        }
        indexers.len()
    }

    /// Shut down every indexer, then the scheduler. Idempotent.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let indexers = self.live_indexers();
        info!("Shutting down index manager ({} indexers)", indexers.len());
        for indexer in indexers {
            if let Err(e) = indexer.shutdown() {
                warn!(
                    "Indexer of {} failed to shut down: {}",
                    indexer.project().name(),
                    e
                );
            }
        }
        self.scheduler.shutdown().await;
    }

    /// Discard all work and indexers and restore the configured defaults
    pub fn reset(&self) {
        let old = {
            let _write = self.monitor.write();
            self.scheduler.reset();
            std::mem::take(&mut *self.map_mut())
        };
        self.set_default_indexer(&self.configured_default);
        info!("Index manager reset ({} indexers dropped)", old.len());
        for indexer in old.into_values() {
            if let Err(e) = indexer.shutdown() {
                warn!(
                    "Indexer of {} failed to shut down: {}",
                    indexer.project().name(),
                    e
                );
            }
        }
    }

    /// Schedule a full reindex of a project
    pub fn reindex(&self, project: &Project) -> Option<JobHandle> {
        let indexer = self.get_indexer_for_project(project)?;
        let job = IndexJob::Reindex {
            project: project.clone(),
        };
        self.schedule(&indexer, vec![job]).pop()
    }

    /// Announce a project as newly added, which indexes all its sources
    pub fn index_project(&self, project: &Project) -> Vec<JobHandle> {
        let delta = ResourceDelta::project(project.location(), ChangeKind::Added);
        self.add_resource_event(project, &delta, ResourceEventKind::PostChange)
    }

    /// The project's own fragment followed by the provided ones
    pub async fn visible_fragments(&self, config: &ProjectConfig) -> Vec<Arc<IndexFragment>> {
        let own = self
            .get_indexer_for_project(&config.project)
            .and_then(|indexer| indexer.fragment());
        let provided = self.providers.get_provided_index_fragments(config).await;

        let mut fragments: Vec<Arc<IndexFragment>> = own.into_iter().collect();
        for fragment in provided {
            if !fragments.iter().any(|known| Arc::ptr_eq(known, &fragment)) {
                fragments.push(fragment);
            }
        }
        fragments
    }

    /// Symbols named `name` in every fragment visible to the project
    pub async fn find_symbols(&self, project: &Project, name: &str) -> Vec<IndexedSymbol> {
        let config = ProjectConfig::default_for(project.clone());
        let mut symbols = Vec::new();
        for fragment in self.visible_fragments(&config).await {
            match fragment.find_symbols(name).await {
                Ok(found) => symbols.extend(found),
                Err(e) => debug!("Skipping fragment during lookup of {}: {}", name, e),
            }
        }
        symbols
    }

    pub fn indexer_progress(&self, project: &Project) -> Option<IndexerProgress> {
        self.existing_indexer(project)
            .map(|indexer| indexer.progress())
    }

    pub fn awaiting_jobs_count(&self) -> usize {
        self.scheduler.awaiting_jobs_count()
    }

    pub fn awaiting_jobs_count_for(&self, project: &Project) -> usize {
        self.scheduler.awaiting_jobs_count_for(project)
    }

    pub fn job_position(&self, id: JobId) -> Option<usize> {
        self.scheduler.job_position(id)
    }

    pub fn awaiting_jobs(&self) -> Vec<JobInfo> {
        self.scheduler.awaiting_jobs()
    }

    pub fn running_jobs(&self) -> Vec<JobInfo> {
        self.scheduler.running_jobs()
    }

    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    pub async fn wait_until_idle(&self) {
        self.scheduler.wait_until_idle().await;
    }
}

impl JobListener for IndexManager {
    fn job_finished(&self, job: &IndexJob, outcome: &JobState) {
        match self.existing_indexer(job.project()) {
            Some(indexer) => indexer.job_finished(job, outcome),
            None => trace!("Job {} finished after its indexer went away", job),
        }
    }

    fn notify_idle(&self, idle_for: Duration) {
        IndexManager::notify_idle(self, idle_for);
    }
}
