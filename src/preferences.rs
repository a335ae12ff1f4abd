//! Named-key preference store
//!
//! Indexer selection and back-end settings live in an external preference
//! store. The index manager only reads and writes named keys through the
//! [`PreferenceStore`] contract, with a workspace scope and per-project
//! overrides.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

use crate::workspace::Project;

/// Preference keys understood by the index manager and its indexers
pub mod keys {
    /// Indexer back-end id (`fast`, `ctags`, `null`, or a configured alias)
    pub const INDEXER_ID: &str = "indexer.id";
    /// Path to the ctags executable when not resolved from `PATH`
    pub const CTAGS_COMMAND: &str = "ctags.command";
    /// Resolve `ctags` from `PATH` instead of `ctags.command`
    pub const CTAGS_USE_PATH: &str = "ctags.use_path";
    /// Keep the tag file in the manager's state directory
    pub const CTAGS_INTERNAL_TAG_FILE: &str = "ctags.internal_tag_file";
    /// Tag file location when `ctags.internal_tag_file` is false
    pub const CTAGS_TAG_FILE_LOCATION: &str = "ctags.tag_file_location";

    pub fn is_ctags_key(key: &str) -> bool {
        key.starts_with("ctags.")
    }
}

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("IO error on preference file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid preference file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// Where a preference value applies; project overrides follow the project root
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PreferenceScope {
    Workspace,
    Project(PathBuf),
}

impl PreferenceScope {
    pub fn project(project: &Project) -> Self {
        Self::Project(project.location().to_path_buf())
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait PreferenceStore: Send + Sync {
    fn get(&self, scope: &PreferenceScope, key: &str) -> Option<String>;

    fn put(&self, scope: &PreferenceScope, key: &str, value: &str) -> Result<(), PreferenceError>;

    fn remove(&self, scope: &PreferenceScope, key: &str) -> Result<(), PreferenceError>;
}

/// Scoped lookups on top of a [`PreferenceStore`]
#[derive(Clone)]
pub struct Preferences {
    store: Arc<dyn PreferenceStore>,
}

impl Preferences {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryPreferenceStore::default()))
    }

    /// Project override first, then the workspace value
    pub fn lookup(&self, project: &Project, key: &str) -> Option<String> {
        self.store
            .get(&PreferenceScope::project(project), key)
            .or_else(|| self.store.get(&PreferenceScope::Workspace, key))
    }

    pub fn lookup_bool(&self, project: &Project, key: &str, default: bool) -> bool {
        match self.lookup(project, key).as_deref() {
            Some("true") => true,
            Some("false") => false,
            Some(other) => {
                warn!("Ignoring non-boolean preference {}={}", key, other);
                default
            }
            None => default,
        }
    }

    pub fn indexer_id(&self, project: &Project) -> Option<String> {
        self.lookup(project, keys::INDEXER_ID)
            .filter(|id| !id.trim().is_empty())
    }

    pub fn put_workspace(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        self.store.put(&PreferenceScope::Workspace, key, value)
    }

    pub fn put_project(
        &self,
        project: &Project,
        key: &str,
        value: &str,
    ) -> Result<(), PreferenceError> {
        self.store.put(&PreferenceScope::project(project), key, value)
    }

    pub fn remove_project(&self, project: &Project, key: &str) -> Result<(), PreferenceError> {
        self.store.remove(&PreferenceScope::project(project), key)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    values: Mutex<HashMap<(PreferenceScope, String), String>>,
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, scope: &PreferenceScope, key: &str) -> Option<String> {
        lock(&self.values)
            .get(&(scope.clone(), key.to_string()))
            .cloned()
    }

    fn put(&self, scope: &PreferenceScope, key: &str, value: &str) -> Result<(), PreferenceError> {
        lock(&self.values).insert((scope.clone(), key.to_string()), value.to_string());
        Ok(())
    }

    fn remove(&self, scope: &PreferenceScope, key: &str) -> Result<(), PreferenceError> {
        lock(&self.values).remove(&(scope.clone(), key.to_string()));
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct PreferenceFile {
    #[serde(default)]
    workspace: BTreeMap<String, String>,
    /// Keyed by project root
    #[serde(default)]
    projects: BTreeMap<PathBuf, BTreeMap<String, String>>,
}

impl PreferenceFile {
    fn scope(&self, scope: &PreferenceScope) -> Option<&BTreeMap<String, String>> {
        match scope {
            PreferenceScope::Workspace => Some(&self.workspace),
            PreferenceScope::Project(root) => self.projects.get(root),
        }
    }

    fn scope_mut(&mut self, scope: &PreferenceScope) -> &mut BTreeMap<String, String> {
        match scope {
            PreferenceScope::Workspace => &mut self.workspace,
            PreferenceScope::Project(root) => self.projects.entry(root.clone()).or_default(),
        }
    }
}

/// Session values layered over another store
///
/// Lookups see session values first. Writes and removals go to the
/// underlying store, so session values are never persisted.
pub struct LayeredPreferenceStore {
    session: MemoryPreferenceStore,
    base: Arc<dyn PreferenceStore>,
}

impl LayeredPreferenceStore {
    pub fn new(base: Arc<dyn PreferenceStore>) -> Self {
        Self {
            session: MemoryPreferenceStore::default(),
            base,
        }
    }

    pub fn set_session(&self, scope: &PreferenceScope, key: &str, value: &str) {
        debug!("Session preference {}={} ({:?})", key, value, scope);
        lock(&self.session.values).insert((scope.clone(), key.to_string()), value.to_string());
    }
}

impl PreferenceStore for LayeredPreferenceStore {
    fn get(&self, scope: &PreferenceScope, key: &str) -> Option<String> {
        self.session
            .get(scope, key)
            .or_else(|| self.base.get(scope, key))
    }

    fn put(&self, scope: &PreferenceScope, key: &str, value: &str) -> Result<(), PreferenceError> {
        self.base.put(scope, key, value)
    }

    fn remove(&self, scope: &PreferenceScope, key: &str) -> Result<(), PreferenceError> {
        self.base.remove(scope, key)
    }
}

/// Preference store persisted as a JSON document, written through on every change
#[derive(Debug)]
pub struct JsonPreferenceStore {
    path: PathBuf,
    values: Mutex<PreferenceFile>,
}

impl JsonPreferenceStore {
    /// Open the store, starting empty when the file does not exist yet
    pub fn open(path: PathBuf) -> Result<Self, PreferenceError> {
        let values = if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|source| PreferenceError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&text).map_err(|e| PreferenceError::Parse {
                path: path.clone(),
                reason: e.to_string(),
            })?
        } else {
            debug!("Preference file {} not found, starting empty", path.display());
            PreferenceFile::default()
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &PreferenceFile) -> Result<(), PreferenceError> {
        let text = serde_json::to_string_pretty(values).map_err(|e| PreferenceError::Parse {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        std::fs::write(&self.path, text).map_err(|source| PreferenceError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl PreferenceStore for JsonPreferenceStore {
    fn get(&self, scope: &PreferenceScope, key: &str) -> Option<String> {
        lock(&self.values)
            .scope(scope)
            .and_then(|values| values.get(key))
            .cloned()
    }

    fn put(&self, scope: &PreferenceScope, key: &str, value: &str) -> Result<(), PreferenceError> {
        let mut values = lock(&self.values);
        values
            .scope_mut(scope)
            .insert(key.to_string(), value.to_string());
        self.persist(&values)
    }

    fn remove(&self, scope: &PreferenceScope, key: &str) -> Result<(), PreferenceError> {
        let mut values = lock(&self.values);
        if values.scope_mut(scope).remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }
}
