//! Tag-generator based indexer
//!
//! Runs an external ctags executable and stores its output as line-granular
//! symbols. Settings are re-read from the preferences for every job, so a
//! changed command or tag file location applies to the next reindex.

pub mod error;
pub mod runner;
pub mod settings;
pub mod tags;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::delta::DeltaJobMapper;
use super::progress::{IndexerProgress, ProgressTracker};
use super::{Indexer, IndexerContext, IndexerError};
use crate::fragment::{FragmentProperties, IndexFragment};
use crate::preferences::{Preferences, keys};
use crate::scheduler::{IndexJob, JobState, JobStatus};
use crate::workspace::content_type::is_indexable;
use crate::workspace::{ContentTypeClassifier, Project, ResourceDelta, ResourceEventKind};

pub use error::CtagsError;
pub use runner::CtagsRunner;
pub use settings::CtagsSettings;
pub use tags::{TagEntry, parse_tags};

pub struct CtagsIndexer {
    project: Project,
    fragment: Arc<IndexFragment>,
    preferences: Preferences,
    classifier: Arc<dyn ContentTypeClassifier>,
    state_dir: PathBuf,
    progress: ProgressTracker,
}

impl CtagsIndexer {
    pub const ID: &'static str = "ctags";

    pub fn new(context: &IndexerContext) -> Self {
        let services = &context.services;
        Self {
            project: context.project.clone(),
            fragment: Arc::new(IndexFragment::new(FragmentProperties::current(
                context.project.name(),
            ))),
            preferences: services.preferences.clone(),
            classifier: Arc::clone(&services.classifier),
            state_dir: services.state_dir.clone(),
            progress: ProgressTracker::default(),
        }
    }

    /// Registry factory
    pub fn create(context: &IndexerContext) -> Result<Arc<dyn Indexer>, IndexerError> {
        Ok(Arc::new(Self::new(context)))
    }

    pub fn settings(&self) -> CtagsSettings {
        CtagsSettings::resolve(&self.preferences, &self.project, &self.state_dir)
    }

    async fn index_file(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<JobStatus, IndexerError> {
        let runner = CtagsRunner::new(self.settings().command);
        let Some(output) = runner.tag_file(path, cancel).await? else {
            return Ok(JobStatus::Cancelled);
        };
        let symbols: Vec<_> = parse_tags(&output, self.project.location())
            .into_iter()
            .filter(|entry| entry.file == path)
            .map(TagEntry::into_symbol)
            .collect();

        let mut content = self.fragment.acquire_write().await?;
        debug!("Tagged {} ({} symbols)", path.display(), symbols.len());
        content.replace_file(path.to_path_buf(), symbols);
        Ok(JobStatus::Completed)
    }

    async fn remove_file(&self, path: &Path) -> Result<JobStatus, IndexerError> {
        let mut content = self.fragment.acquire_write().await?;
        if content.remove_file(path) {
            debug!("Removed {} from tag index", path.display());
        }
        Ok(JobStatus::Completed)
    }

    async fn remove_folder(&self, folder: &Path) -> Result<JobStatus, IndexerError> {
        let mut content = self.fragment.acquire_write().await?;
        content.remove_under(folder);
        Ok(JobStatus::Completed)
    }

    /// Regenerate the tag file for the whole project and swap it in
    ///
    /// The old content stays visible while ctags runs; the swap happens under
    /// one write lock. A cancelled pass leaves the fragment empty.
    async fn rebuild(&self, cancel: &CancellationToken) -> Result<JobStatus, IndexerError> {
        let started = Instant::now();
        let settings = self.settings();
        info!(
            "Generating tags for {} into {}",
            self.project.name(),
            settings.tag_file.display()
        );

        let runner = CtagsRunner::new(&settings.command);
        if !runner
            .tag_tree(self.project.location(), &settings.tag_file, cancel)
            .await?
        {
            return self.clear_cancelled().await;
        }
        let text = tokio::fs::read_to_string(&settings.tag_file)
            .await
            .map_err(|source| CtagsError::Io {
                path: settings.tag_file.clone(),
                source,
            })?;
        let entries: Vec<TagEntry> = parse_tags(&text, self.project.location())
            .into_iter()
            .filter(|entry| is_indexable(self.classifier.as_ref(), &entry.file))
            .collect();
        let files = tags::group_by_file(entries);

        let mut content = self.fragment.acquire_write().await?;
        content.clear();
        if cancel.is_cancelled() {
            return Ok(JobStatus::Cancelled);
        }
        for (file, symbols) in files {
            content.replace_file(file, symbols);
        }
        info!(
            "Tag index of {} holds {} symbols in {} files",
            self.project.name(),
            content.symbol_count(),
            content.file_count()
        );
        crate::log_timing!(tracing::Level::INFO, "ctags-reindex", started.elapsed());
        Ok(JobStatus::Completed)
    }

    async fn clear_cancelled(&self) -> Result<JobStatus, IndexerError> {
        self.fragment.acquire_write().await?.clear();
        Ok(JobStatus::Cancelled)
    }
}

#[async_trait]
impl Indexer for CtagsIndexer {
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
        if cancel.is_cancelled() && !job.is_full_pass() {
            return Ok(JobStatus::Cancelled);
        }
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

    fn preferences_changed(&self, key: &str) -> Vec<IndexJob> {
        if !keys::is_ctags_key(key) {
            trace!("Ignoring preference {} for {}", key, self.project.name());
            return Vec::new();
        }
        info!(
            "ctags preference {} changed for {}; scheduling reindex",
            key,
            self.project.name()
        );
        vec![IndexJob::Reindex {
            project: self.project.clone(),
        }]
    }

    fn progress(&self) -> IndexerProgress {
        self.progress.snapshot()
    }

    fn shutdown(&self) -> Result<(), IndexerError> {
        debug!("Closing tag index fragment of {}", self.project.name());
        self.fragment.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{SymbolKind, SymbolLocation};
    use crate::indexer::{IndexerServices, ParseOptions};
    use crate::indexer::fast::DeclarationScanner;
    use crate::workspace::ExtensionClassifier;
    use std::fs;

    /// Shell stand-in for ctags: one tag per target file, two for a tree
    const FAKE_CTAGS: &str = r#"#!/bin/sh
out=""
while [ $# -gt 1 ]; do
  if [ "$1" = "-f" ]; then out="$2"; shift; fi
  shift
done
target="$1"
if [ "$out" = "-" ]; then
  printf 'single\t%s\t1;"\tfunction\tline:1\n' "$target"
else
  printf 'alpha\t%s/a.c\t3;"\tfunction\tline:3\nBETA\t%s/b.h\t1;"\tmacro\tline:1\nnotes\t%s/notes.txt\t1;"\tvariable\tline:1\n' "$target" "$target" "$target" > "$out"
fi
"#;

    fn indexer(root: &Path, preferences: Preferences) -> CtagsIndexer {
        let classifier = Arc::new(ExtensionClassifier::new());
        let services = IndexerServices {
            preferences,
            classifier: classifier.clone(),
            parser: Arc::new(DeclarationScanner::new(classifier).unwrap()),
            state_dir: root.join(".state"),
            parse_options: ParseOptions::default(),
        };
        CtagsIndexer::new(&services.context_for(&Project::new("demo", root)))
    }

    #[cfg(unix)]
    fn fake_ctags(dir: &Path) -> Preferences {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("fake-ctags");
        fs::write(&script, FAKE_CTAGS).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        let prefs = Preferences::in_memory();
        prefs.put_workspace(keys::CTAGS_USE_PATH, "false").unwrap();
        prefs
            .put_workspace(keys::CTAGS_COMMAND, script.to_str().unwrap())
            .unwrap();
        prefs
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reindex_loads_tag_file() {
        let tools = tempfile::tempdir().unwrap();
        let project_dir = tempfile::tempdir().unwrap();
        let root = project_dir.path();
        let indexer = indexer(root, fake_ctags(tools.path()));
        let job = IndexJob::Reindex {
            project: indexer.project().clone(),
        };

        let status = indexer
            .execute(&job, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Completed);
        assert!(indexer.settings().tag_file.exists());

        let fragment = indexer.fragment().unwrap();
        let alpha = fragment.find_symbols("alpha").await.unwrap();
        assert_eq!(alpha.len(), 1);
        assert_eq!(alpha[0].location, SymbolLocation::LineNumber(3));
        assert_eq!(alpha[0].location.node_length(), -1);
        assert_eq!(alpha[0].location.node_offset(), 3);
        assert!(alpha[0].binding().is_none());

        let beta = fragment.find_symbols("BETA").await.unwrap();
        assert_eq!(beta[0].kind, SymbolKind::Macro);
        assert!(fragment.find_symbols("notes").await.unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_single_file_jobs_replace_that_file() {
        let tools = tempfile::tempdir().unwrap();
        let root = Path::new("/work/demo");
        let indexer = indexer(root, fake_ctags(tools.path()));
        let project = indexer.project().clone();
        let file = root.join("src/a.cpp");
        let cancel = CancellationToken::new();

        let add = IndexJob::AddTranslationUnit {
            project: project.clone(),
            path: file.clone(),
        };
        indexer.execute(&add, &cancel).await.unwrap();
        let found = indexer.fragment.find_symbols("single").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].file, file);

        let remove = IndexJob::RemoveTranslationUnit {
            project,
            path: file,
        };
        indexer.execute(&remove, &cancel).await.unwrap();
        assert!(indexer.fragment.find_symbols("single").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_executable_fails_job_and_keeps_content() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = Preferences::in_memory();
        prefs.put_workspace(keys::CTAGS_USE_PATH, "false").unwrap();
        prefs
            .put_workspace(keys::CTAGS_COMMAND, "/nonexistent/ctags")
            .unwrap();
        let indexer = indexer(dir.path(), prefs);
        let kept = dir.path().join("kept.c");
        indexer
            .fragment
            .acquire_write()
            .await
            .unwrap()
            .replace_file(kept.clone(), Vec::new());

        let job = IndexJob::Reindex {
            project: indexer.project().clone(),
        };
        let result = indexer.execute(&job, &CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(IndexerError::Ctags(CtagsError::CommandNotFound { .. }))
        ));
        assert!(indexer.fragment.acquire_read().await.unwrap().is_indexed(&kept));
    }

    #[tokio::test]
    async fn test_cancelled_reindex_clears_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let indexer = indexer(dir.path(), Preferences::in_memory());
        indexer
            .fragment
            .acquire_write()
            .await
            .unwrap()
            .replace_file(dir.path().join("old.c"), Vec::new());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let job = IndexJob::Reindex {
            project: indexer.project().clone(),
        };
        assert_eq!(
            indexer.execute(&job, &cancel).await.unwrap(),
            JobStatus::Cancelled
        );
        assert_eq!(indexer.fragment.acquire_read().await.unwrap().file_count(), 0);
    }

    #[test]
    fn test_only_ctags_preferences_trigger_reindex() {
        let indexer = indexer(Path::new("/work/demo"), Preferences::in_memory());
        let jobs = indexer.preferences_changed(keys::CTAGS_COMMAND);
        assert_eq!(
            jobs,
            vec![IndexJob::Reindex {
                project: indexer.project().clone()
            }]
        );
        assert!(indexer.preferences_changed("editor.tab_width").is_empty());
    }

    #[test]
    fn test_settings_follow_preferences() {
        let prefs = Preferences::in_memory();
        let indexer = indexer(Path::new("/work/demo"), prefs.clone());
        assert!(indexer.settings().internal_tag_file);

        prefs
            .put_workspace(keys::CTAGS_INTERNAL_TAG_FILE, "false")
            .unwrap();
        assert_eq!(
            indexer.settings().tag_file,
            PathBuf::from("/work/demo/tags")
        );
    }

    #[cfg(feature = "ctags-integration-tests")]
    #[tokio::test]
    async fn test_real_ctags_indexes_project() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(
            root.join("shapes.hpp"),
            "namespace geo {\nclass Shape {\npublic:\n  double area() const;\n};\n}\n",
        )
        .unwrap();
        let indexer = indexer(root, Preferences::in_memory());
        let job = IndexJob::Reindex {
            project: indexer.project().clone(),
        };
        indexer
            .execute(&job, &CancellationToken::new())
            .await
            .unwrap();

        let shapes = indexer.fragment.find_symbols("Shape").await.unwrap();
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].kind, SymbolKind::Class);
        assert_eq!(shapes[0].location, SymbolLocation::LineNumber(2));
    }
}
