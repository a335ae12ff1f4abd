//! Priority job scheduler backed by a tokio worker pool
//!
//! Waiting jobs live in a growable array whose active window is bounded by
//! `job_start`/`job_end`. Workers pick the first waiting job whose project has
//! no running job, so each project's jobs run one at a time in enqueue order
//! while different projects proceed in parallel. Change notifications are
//! placed at the front of the window.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::error::SchedulerError;
use super::job::{IndexJob, JobHandle, JobId, JobInfo, JobState, JobStatus};
use crate::indexer::Indexer;
use crate::workspace::Project;

/// Consumed slots before the array is compacted
const COMPACTION_THRESHOLD: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of worker tasks executing jobs
    pub workers: usize,
    /// How often an idle scheduler reports idleness, in milliseconds
    pub idle_poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            idle_poll_interval_ms: 1_000,
        }
    }
}

impl SchedulerConfig {
    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms.max(1))
    }
}

/// Callbacks the scheduler raises as jobs finish and the queue idles
pub trait JobListener: Send + Sync {
    fn job_finished(&self, job: &IndexJob, outcome: &JobState);

    fn notify_idle(&self, idle_for: Duration);
}

struct ScheduledJob {
    id: JobId,
    job: IndexJob,
    target: Arc<dyn Indexer>,
    cancel: CancellationToken,
    enqueued_at: chrono::DateTime<Utc>,
    state: watch::Sender<JobState>,
}

impl ScheduledJob {
    fn info(&self, state: JobState) -> JobInfo {
        JobInfo {
            id: self.id,
            job: self.job.clone(),
            state,
            enqueued_at: self.enqueued_at,
        }
    }

    fn discard(self) {
        self.cancel.cancel();
        self.state.send_replace(JobState::Cancelled);
    }
}

struct RunningJob {
    info: JobInfo,
    cancel: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    /// Slots before `job_start` are consumed; `job_end == awaiting_jobs.len()`
    awaiting_jobs: Vec<Option<ScheduledJob>>,
    job_start: usize,
    job_end: usize,
    running: Vec<RunningJob>,
    enabled: bool,
    shut_down: bool,
    idle_since: Option<Instant>,
}

impl QueueState {
    fn push_back(&mut self, job: ScheduledJob) {
        self.awaiting_jobs.push(Some(job));
        self.job_end += 1;
    }

    fn push_front(&mut self, job: ScheduledJob) {
        if self.job_start > 0 {
            self.job_start -= 1;
            self.awaiting_jobs[self.job_start] = Some(job);
        } else {
            self.awaiting_jobs.insert(0, Some(job));
            self.job_end += 1;
        }
    }

    fn awaiting(&self) -> impl Iterator<Item = &ScheduledJob> {
        self.awaiting_jobs[self.job_start..self.job_end]
            .iter()
            .flatten()
    }

    fn is_project_running(&self, project: &Project) -> bool {
        self.running
            .iter()
            .any(|running| running.info.job.project() == project)
    }

    /// Take the first waiting job whose project is not busy and mark it running
    fn take_next_runnable(&mut self) -> Option<ScheduledJob> {
        let index = (self.job_start..self.job_end).find(|&i| {
            self.awaiting_jobs[i]
                .as_ref()
                .is_some_and(|job| !self.is_project_running(job.job.project()))
        })?;
        let job = self.awaiting_jobs[index].take()?;
        self.running.push(RunningJob {
            info: job.info(JobState::Running),
            cancel: job.cancel.clone(),
        });
        self.advance_start();
        Some(job)
    }

    /// Remove every waiting job matching the predicate
    fn take_matching<F: Fn(&IndexJob) -> bool>(&mut self, matches: F) -> Vec<ScheduledJob> {
        let mut taken = Vec::new();
        for slot in &mut self.awaiting_jobs[self.job_start..self.job_end] {
            if slot.as_ref().is_some_and(|job| matches(&job.job)) {
                taken.extend(slot.take());
            }
        }
        self.advance_start();
        taken
    }

    fn advance_start(&mut self) {
        while self.job_start < self.job_end && self.awaiting_jobs[self.job_start].is_none() {
            self.job_start += 1;
        }
        if self.job_start == self.job_end {
            self.awaiting_jobs.clear();
            self.job_start = 0;
            self.job_end = 0;
        } else if self.job_start >= COMPACTION_THRESHOLD {
            self.compact();
        }
    }

    /// Drop consumed and discarded slots
    fn compact(&mut self) {
        self.awaiting_jobs.retain(Option::is_some);
        self.job_start = 0;
        self.job_end = self.awaiting_jobs.len();
        trace!("Scheduler: compacted queue to {} jobs", self.job_end);
    }

    fn awaiting_count(&self) -> usize {
        self.awaiting().count()
    }

    fn is_idle(&self) -> bool {
        self.running.is_empty() && self.awaiting_count() == 0
    }
}

/// Runs index jobs on a pool of tokio tasks
pub struct JobScheduler {
    config: SchedulerConfig,
    state: Mutex<QueueState>,
    /// Wakes workers when work may have become runnable
    wakeup: Notify,
    /// Wakes `wait_until_idle` callers
    idle: Notify,
    listener: Weak<dyn JobListener>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    pub fn new(config: SchedulerConfig, listener: Weak<dyn JobListener>) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState {
                enabled: true,
                ..QueueState::default()
            }),
            wakeup: Notify::new(),
            idle: Notify::new(),
            listener,
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the worker tasks; must be called from within a tokio runtime
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if !workers.is_empty() || self.shutdown.is_cancelled() {
            return;
        }
        let count = self.config.workers.max(1);
        info!("Starting job scheduler with {} workers", count);
        for worker in 0..count {
            let scheduler = Arc::clone(self);
            workers.push(tokio::spawn(async move {
                scheduler.worker_loop(worker).await;
            }));
        }
    }

    /// Enqueue a job for the given indexer
    pub fn request(
        &self,
        job: IndexJob,
        target: Arc<dyn Indexer>,
    ) -> Result<JobHandle, SchedulerError> {
        let (state_tx, state_rx) = watch::channel(JobState::Waiting);
        let id = JobId::new();
        {
            let mut state = self.lock_state();
            if state.shut_down {
                return Err(SchedulerError::ShutDown);
            }
            debug!("Scheduling job {}: {}", id, job);
            let front = job.wants_front_of_queue();
            let scheduled = ScheduledJob {
                id,
                job,
                target,
                cancel: self.shutdown.child_token(),
                enqueued_at: Utc::now(),
                state: state_tx,
            };
            if front {
                state.push_front(scheduled);
            } else {
                state.push_back(scheduled);
            }
            state.idle_since = None;
        }
        self.wakeup.notify_waiters();
        Ok(JobHandle::new(id, state_rx))
    }

    /// Remove all waiting jobs of a project and cancel its running job
    ///
    /// Returns the number of waiting jobs that were discarded. Running jobs of
    /// other projects are left alone.
    pub fn discard_jobs(&self, project: &Project) -> usize {
        let discarded = {
            let mut state = self.lock_state();
            for running in &state.running {
                if running.info.job.project() == project {
                    debug!("Cancelling running job {}", running.info.job);
                    running.cancel.cancel();
                }
            }
            state.take_matching(|job| job.project() == project)
        };
        let count = discarded.len();
        for job in discarded {
            job.discard();
        }
        if count > 0 {
            info!(
                "Discarded {} waiting jobs for project {}",
                count,
                project.name()
            );
        }
        self.signal_if_idle();
        count
    }

    /// Discard everything waiting and cancel everything running
    pub fn reset(&self) {
        let discarded = {
            let mut state = self.lock_state();
            for running in &state.running {
                running.cancel.cancel();
            }
            state.enabled = true;
            state.idle_since = None;
            state.take_matching(|_| true)
        };
        debug!("Scheduler reset discarded {} waiting jobs", discarded.len());
        for job in discarded {
            job.discard();
        }
        self.wakeup.notify_waiters();
        self.signal_if_idle();
    }

    /// Stop starting new jobs; queued jobs keep waiting
    pub fn disable(&self) {
        self.lock_state().enabled = false;
        debug!("Job scheduler disabled");
    }

    pub fn enable(&self) {
        self.lock_state().enabled = true;
        debug!("Job scheduler enabled");
        self.wakeup.notify_waiters();
    }

    pub fn is_enabled(&self) -> bool {
        self.lock_state().enabled
    }

    pub fn awaiting_jobs_count(&self) -> usize {
        self.lock_state().awaiting_count()
    }

    pub fn awaiting_jobs_count_for(&self, project: &Project) -> usize {
        self.lock_state()
            .awaiting()
            .filter(|job| job.job.project() == project)
            .count()
    }

    /// Position of a waiting job in the queue, 0 being the next in line
    pub fn job_position(&self, id: JobId) -> Option<usize> {
        self.lock_state().awaiting().position(|job| job.id == id)
    }

    pub fn awaiting_jobs(&self) -> Vec<JobInfo> {
        self.lock_state()
            .awaiting()
            .map(|job| job.info(JobState::Waiting))
            .collect()
    }

    pub fn running_jobs(&self) -> Vec<JobInfo> {
        self.lock_state()
            .running
            .iter()
            .map(|running| running.info.clone())
            .collect()
    }

    pub fn is_idle(&self) -> bool {
        self.lock_state().is_idle()
    }

    /// Wait until nothing is queued or running
    ///
    /// Never returns while the scheduler is disabled with jobs waiting; layer
    /// `tokio::time::timeout` on top when a deadline is needed.
    pub async fn wait_until_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Cancel all work and stop the workers. Idempotent.
    pub async fn shutdown(&self) {
        let discarded = {
            let mut state = self.lock_state();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            for running in &state.running {
                running.cancel.cancel();
            }
            state.take_matching(|_| true)
        };
        info!(
            "Shutting down job scheduler ({} waiting jobs discarded)",
            discarded.len()
        );
        for job in discarded {
            job.discard();
        }
        self.shutdown.cancel();
        self.wakeup.notify_waiters();

        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Scheduler worker ended abnormally: {}", e);
            }
        }
        self.signal_if_idle();
    }

    fn signal_if_idle(&self) {
        if self.is_idle() {
            self.idle.notify_waiters();
        }
    }

    async fn worker_loop(self: Arc<Self>, worker: usize) {
        trace!("Scheduler worker {} started", worker);
        loop {
            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next = {
                let mut state = self.lock_state();
                if state.shut_down {
                    break;
                }
                if state.enabled {
                    state.take_next_runnable()
                } else {
                    None
                }
            };

            match next {
                Some(job) => self.run_job(job).await,
                None => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.idle_poll_interval()) => {
                            // Only one worker reports idleness
                            if worker == 0 {
                                self.idle_tick();
                            }
                        }
                    }
                }
            }
        }
        trace!("Scheduler worker {} stopped", worker);
    }

    fn idle_tick(&self) {
        let idle_for = {
            let mut state = self.lock_state();
            if !state.is_idle() {
                return;
            }
            state.idle_since.get_or_insert_with(Instant::now).elapsed()
        };
        if let Some(listener) = self.listener.upgrade() {
            listener.notify_idle(idle_for);
        }
    }

    async fn run_job(&self, scheduled: ScheduledJob) {
        let ScheduledJob {
            id,
            job,
            target,
            cancel,
            state,
            ..
        } = scheduled;

        let outcome = if cancel.is_cancelled() {
            JobState::Cancelled
        } else {
            state.send_replace(JobState::Running);
            let started = Instant::now();
            let task_job = job.clone();
            let task_cancel = cancel.clone();
            // Own task per job so a panicking back-end only fails its job
            let result =
                tokio::spawn(async move { target.execute(&task_job, &task_cancel).await }).await;
            crate::log_timing!(tracing::Level::DEBUG, job.label(), started.elapsed());

            match result {
                Ok(Ok(JobStatus::Completed)) => JobState::Completed,
                Ok(Ok(JobStatus::Cancelled)) => JobState::Cancelled,
                Ok(Err(e)) => {
                    warn!("Job {} failed: {}", job, e);
                    JobState::Failed(e.to_string())
                }
                Err(e) => {
                    warn!("Job {} aborted: {}", job, e);
                    JobState::Failed(format!("job task aborted: {}", e))
                }
            }
        };
        debug!("Job {} finished: {:?}", id, outcome);

        if let Some(listener) = self.listener.upgrade() {
            listener.job_finished(&job, &outcome);
        }

        {
            let mut queue = self.lock_state();
            queue.running.retain(|running| running.info.id != id);
            if queue.is_idle() {
                queue.idle_since = Some(Instant::now());
            }
        }
        state.send_replace(outcome);
        self.wakeup.notify_waiters();
        self.signal_if_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordingIndexer, RecordingListener};
    use std::path::PathBuf;

    fn project(name: &str) -> Project {
        Project::new(name, format!("/work/{}", name))
    }

    fn add_job(project: &Project, file: &str) -> IndexJob {
        IndexJob::AddTranslationUnit {
            project: project.clone(),
            path: project.location().join(file),
        }
    }

    fn scheduler_with_listener() -> (Arc<JobScheduler>, Arc<RecordingListener>) {
        let listener = Arc::new(RecordingListener::default());
        let weak: Weak<dyn JobListener> = Arc::downgrade(&listener) as Weak<dyn JobListener>;
        let config = SchedulerConfig {
            workers: 2,
            idle_poll_interval_ms: 20,
        };
        (Arc::new(JobScheduler::new(config, weak)), listener)
    }

    #[tokio::test]
    async fn test_jobs_of_one_project_run_in_order() {
        let (scheduler, listener) = scheduler_with_listener();
        let p = project("p");
        let indexer = Arc::new(RecordingIndexer::new(p.clone()));

        scheduler.disable();
        for file in ["a.c", "b.c", "c.c"] {
            scheduler
                .request(add_job(&p, file), indexer.clone())
                .unwrap();
        }
        assert_eq!(scheduler.awaiting_jobs_count(), 3);
        scheduler.start();
        scheduler.enable();
        scheduler.wait_until_idle().await;

        let executed: Vec<PathBuf> = indexer
            .executed()
            .iter()
            .filter_map(|job| job.path().map(PathBuf::from))
            .collect();
        assert_eq!(
            executed,
            vec![
                PathBuf::from("/work/p/a.c"),
                PathBuf::from("/work/p/b.c"),
                PathBuf::from("/work/p/c.c"),
            ]
        );
        assert_eq!(listener.finished().len(), 3);
    }

    #[tokio::test]
    async fn test_change_notification_goes_to_front() {
        let (scheduler, _listener) = scheduler_with_listener();
        let p = project("p");
        let indexer = Arc::new(RecordingIndexer::new(p.clone()));

        scheduler.disable();
        let first = scheduler
            .request(add_job(&p, "a.c"), indexer.clone())
            .unwrap();
        let notify = scheduler
            .request(
                IndexJob::ChangeNotification { project: p.clone() },
                indexer.clone(),
            )
            .unwrap();

        assert_eq!(scheduler.job_position(notify.id()), Some(0));
        assert_eq!(scheduler.job_position(first.id()), Some(1));
    }

    #[tokio::test]
    async fn test_discard_leaves_other_projects_alone() {
        let (scheduler, listener) = scheduler_with_listener();
        let p = project("p");
        let q = project("q");
        let p_indexer = Arc::new(RecordingIndexer::new(p.clone()));
        let q_indexer = Arc::new(RecordingIndexer::new(q.clone()));

        scheduler.disable();
        let mut p_handles = Vec::new();
        for i in 0..10 {
            p_handles.push(
                scheduler
                    .request(add_job(&p, &format!("{i}.c")), p_indexer.clone())
                    .unwrap(),
            );
        }
        scheduler
            .request(add_job(&q, "main.c"), q_indexer.clone())
            .unwrap();

        assert_eq!(scheduler.awaiting_jobs_count_for(&p), 10);
        assert_eq!(scheduler.discard_jobs(&p), 10);
        assert_eq!(scheduler.awaiting_jobs_count(), 1);

        scheduler.start();
        scheduler.enable();
        scheduler.wait_until_idle().await;

        assert!(p_indexer.executed().is_empty());
        assert_eq!(q_indexer.executed().len(), 1);
        for handle in p_handles {
            assert_eq!(handle.wait().await, JobState::Cancelled);
        }
        // Discarded jobs never reach the completion callback
        assert_eq!(listener.finished().len(), 1);
    }

    #[tokio::test]
    async fn test_failures_and_panics_do_not_stop_workers() {
        let (scheduler, listener) = scheduler_with_listener();
        let p = project("p");
        let indexer = Arc::new(
            RecordingIndexer::new(p.clone())
                .failing_on("/work/p/bad.c")
                .panicking_on("/work/p/panic.c"),
        );
        scheduler.start();

        let bad = scheduler
            .request(add_job(&p, "bad.c"), indexer.clone())
            .unwrap();
        let panic = scheduler
            .request(add_job(&p, "panic.c"), indexer.clone())
            .unwrap();
        let good = scheduler
            .request(add_job(&p, "good.c"), indexer.clone())
            .unwrap();

        assert!(matches!(bad.wait().await, JobState::Failed(_)));
        assert!(matches!(panic.wait().await, JobState::Failed(_)));
        assert_eq!(good.wait().await, JobState::Completed);

        scheduler.wait_until_idle().await;
        let outcomes: Vec<JobState> = listener
            .finished()
            .into_iter()
            .map(|(_, outcome)| outcome)
            .collect();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[2], JobState::Completed);
    }

    #[tokio::test]
    async fn test_queue_compacts_after_many_jobs() {
        let (scheduler, _listener) = scheduler_with_listener();
        let p = project("p");
        let indexer = Arc::new(RecordingIndexer::new(p.clone()));
        scheduler.start();

        let mut handles = Vec::new();
        for i in 0..(COMPACTION_THRESHOLD * 2 + 5) {
            handles.push(
                scheduler
                    .request(add_job(&p, &format!("{i}.c")), indexer.clone())
                    .unwrap(),
            );
        }
        for handle in handles {
            assert_eq!(handle.wait().await, JobState::Completed);
        }
        scheduler.wait_until_idle().await;

        let state = scheduler.lock_state();
        assert_eq!(state.job_start, 0);
        assert_eq!(state.job_end, 0);
        assert!(state.awaiting_jobs.is_empty());
    }

    #[tokio::test]
    async fn test_idle_notifications_after_drain() {
        let (scheduler, listener) = scheduler_with_listener();
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(listener.idle_notifications() >= 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_rejects_requests() {
        let (scheduler, _listener) = scheduler_with_listener();
        let p = project("p");
        let indexer = Arc::new(RecordingIndexer::new(p.clone()));
        scheduler.start();

        scheduler.shutdown().await;
        scheduler.shutdown().await;

        assert!(matches!(
            scheduler.request(add_job(&p, "a.c"), indexer),
            Err(SchedulerError::ShutDown)
        ));
    }
}
