//! Resource delta to index job translation
//!
//! Shared by every back-end that keeps a fragment: walks a delta tree and
//! emits one job per affected translation unit.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::scheduler::IndexJob;
use crate::workspace::content_type::is_indexable;
use crate::workspace::{
    ChangeKind, ContentTypeClassifier, ElementKind, Project, ResourceDelta, ResourceEventKind,
};

/// Every indexable file below `root`, sorted, skipping hidden directories
pub fn enumerate_sources(root: &Path, classifier: &dyn ContentTypeClassifier) -> Vec<PathBuf> {
    let mut sources: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.path()))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_indexable(classifier, path))
        .collect();
    sources.sort();
    trace!("Enumerated {} sources under {}", sources.len(), root.display());
    sources
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

/// Maps the deltas of one project onto jobs for that project
pub struct DeltaJobMapper<'a> {
    project: &'a Project,
    classifier: &'a dyn ContentTypeClassifier,
}

impl<'a> DeltaJobMapper<'a> {
    pub fn new(project: &'a Project, classifier: &'a dyn ContentTypeClassifier) -> Self {
        Self {
            project,
            classifier,
        }
    }

    /// Jobs for a delta describing added or changed resources
    pub fn added(&self, delta: &ResourceDelta, kind: ResourceEventKind) -> Vec<IndexJob> {
        if kind != ResourceEventKind::PostChange {
            trace!("Ignoring {:?} event for {}", kind, self.project.name());
            return Vec::new();
        }
        let mut jobs = JobList::default();
        self.collect_added(delta, &mut jobs);
        debug!(
            "Delta for {} produced {} jobs",
            self.project.name(),
            jobs.jobs.len()
        );
        jobs.jobs
    }

    /// Jobs for a delta describing resources about to be removed
    ///
    /// A removed project yields nothing here: its jobs and indexer are dropped
    /// by the index manager instead.
    pub fn removed(&self, delta: &ResourceDelta, kind: ResourceEventKind) -> Vec<IndexJob> {
        if kind != ResourceEventKind::PostChange {
            return Vec::new();
        }
        let mut jobs = JobList::default();
        self.collect_removed(delta, &mut jobs);
        jobs.jobs
    }

    fn collect_removed(&self, delta: &ResourceDelta, jobs: &mut JobList) {
        match (delta.element, delta.change) {
            (ElementKind::Project, ChangeKind::Removed) => return,
            (ElementKind::TranslationUnit { working_copy: false }, ChangeKind::Removed) => {
                jobs.push(self.remove_job(delta.path.clone()));
            }
            (ElementKind::Other, ChangeKind::Removed) => {
                // Covers indexed files the delta does not list one by one
                jobs.push(self.remove_folder_job(delta.path.clone()));
                return;
            }
            _ => {}
        }
        for child in &delta.children {
            self.collect_removed(child, jobs);
        }
    }

    fn collect_added(&self, delta: &ResourceDelta, jobs: &mut JobList) {
        match (delta.element, delta.change) {
            (ElementKind::Project, ChangeKind::Added) => {
                // A new project subsumes whatever its children describe
                for path in enumerate_sources(&delta.path, self.classifier) {
                    jobs.push(self.add_job(path));
                }
                return;
            }
            (ElementKind::TranslationUnit { working_copy: true }, _) => {
                trace!("Ignoring working copy {}", delta.path.display());
            }
            (ElementKind::TranslationUnit { .. }, ChangeKind::Removed) => {
                jobs.push(self.remove_job(delta.path.clone()));
            }
            (ElementKind::TranslationUnit { .. }, change) => {
                if is_indexable(self.classifier, &delta.path) {
                    let path = delta.path.clone();
                    jobs.push(match change {
                        ChangeKind::Added => self.add_job(path),
                        _ => IndexJob::ChangeTranslationUnit {
                            project: self.project.clone(),
                            path,
                        },
                    });
                } else {
                    trace!("Not indexable: {}", delta.path.display());
                }
            }
            (ElementKind::Other, ChangeKind::Added) if delta.children.is_empty() => {
                // A folder that arrived in one piece
                for path in enumerate_sources(&delta.path, self.classifier) {
                    jobs.push(self.add_job(path));
                }
            }
            (ElementKind::Other, ChangeKind::Removed) => {
                jobs.push(self.remove_folder_job(delta.path.clone()));
                return;
            }
            _ => {}
        }
        for child in &delta.children {
            self.collect_added(child, jobs);
        }
    }

    fn add_job(&self, path: PathBuf) -> IndexJob {
        IndexJob::AddTranslationUnit {
            project: self.project.clone(),
            path,
        }
    }

    fn remove_job(&self, path: PathBuf) -> IndexJob {
        IndexJob::RemoveTranslationUnit {
            project: self.project.clone(),
            path,
        }
    }

    fn remove_folder_job(&self, path: PathBuf) -> IndexJob {
        IndexJob::RemoveFolder {
            project: self.project.clone(),
            path,
        }
    }
}

/// Job list that keeps only the first job per (kind, path)
#[derive(Default)]
struct JobList {
    jobs: Vec<IndexJob>,
    seen: HashSet<(&'static str, PathBuf)>,
}

impl JobList {
    fn push(&mut self, job: IndexJob) {
        let key = (job.label(), job.path().map(Path::to_path_buf).unwrap_or_default());
        if self.seen.insert(key) {
            self.jobs.push(job);
        }
    }
}
