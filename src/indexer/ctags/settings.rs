//! Ctags preferences resolved for one project

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::preferences::{Preferences, keys};
use crate::workspace::Project;

/// Executable used when no explicit command is configured
pub const DEFAULT_COMMAND: &str = "ctags";

/// Tag file name used for an external tag file without a configured location
pub const DEFAULT_TAG_FILE: &str = "tags";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtagsSettings {
    pub command: PathBuf,
    pub tag_file: PathBuf,
    /// Whether `tag_file` lives in the manager's state directory
    pub internal_tag_file: bool,
}

impl CtagsSettings {
    pub fn resolve(preferences: &Preferences, project: &Project, state_dir: &Path) -> Self {
        let use_path = preferences.lookup_bool(project, keys::CTAGS_USE_PATH, true);
        let command = if use_path {
            PathBuf::from(DEFAULT_COMMAND)
        } else {
            match non_blank(preferences.lookup(project, keys::CTAGS_COMMAND)) {
                Some(command) => PathBuf::from(command),
                None => {
                    warn!(
                        "{} is false but {} is unset for {}; using {}",
                        keys::CTAGS_USE_PATH,
                        keys::CTAGS_COMMAND,
                        project.name(),
                        DEFAULT_COMMAND
                    );
                    PathBuf::from(DEFAULT_COMMAND)
                }
            }
        };

        let internal_tag_file =
            preferences.lookup_bool(project, keys::CTAGS_INTERNAL_TAG_FILE, true);
        let tag_file = if internal_tag_file {
            internal_tag_file_path(state_dir, project)
        } else {
            let location = non_blank(preferences.lookup(project, keys::CTAGS_TAG_FILE_LOCATION))
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TAG_FILE));
            if location.is_absolute() {
                location
            } else {
                project.location().join(location)
            }
        };

        Self {
            command,
            tag_file,
            internal_tag_file,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

/// Tag file in the state directory, named after a digest of the project location
pub fn internal_tag_file_path(state_dir: &Path, project: &Project) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(project.location().to_string_lossy().as_bytes());
    state_dir
        .join("ctags")
        .join(format!("{:x}.tags", hasher.finalize()))
}
