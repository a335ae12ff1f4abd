//! Legacy read-only fragment providers
//!
//! Older providers only describe where their fragments live. The adapter
//! loads each described snapshot once, caches it, and presents the provider
//! through [`IndexFragmentProvider`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use super::{IndexFragmentProvider, ProviderError};
use crate::fragment::{FragmentSnapshot, IndexFragment};
use crate::workspace::{Project, ProjectConfig};

/// Location of one read-only fragment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FragmentDescriptor {
    pub name: String,
    pub location: PathBuf,
}

#[cfg_attr(test, mockall::automock)]
pub trait ReadOnlyFragmentProvider: Send + Sync {
    fn id(&self) -> &str;

    fn provides_for(&self, project: &Project) -> Result<bool, ProviderError>;

    fn fragment_descriptors(
        &self,
        config: &ProjectConfig,
    ) -> Result<Vec<FragmentDescriptor>, ProviderError>;
}

/// Presents a [`ReadOnlyFragmentProvider`] as a regular provider
pub struct ReadOnlyProviderAdapter {
    inner: Arc<dyn ReadOnlyFragmentProvider>,
    loaded: Mutex<HashMap<PathBuf, Arc<IndexFragment>>>,
}

impl ReadOnlyProviderAdapter {
    pub fn new(inner: Arc<dyn ReadOnlyFragmentProvider>) -> Self {
        Self {
            inner,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, location: &Path) -> Option<Arc<IndexFragment>> {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(location)
            .cloned()
    }

    async fn load(&self, descriptor: &FragmentDescriptor) -> Result<Arc<IndexFragment>, ProviderError> {
        if let Some(fragment) = self.cached(&descriptor.location) {
            return Ok(fragment);
        }
        let location = descriptor.location.clone();
        let snapshot = tokio::task::spawn_blocking(move || FragmentSnapshot::load(&location))
            .await
            .map_err(|e| ProviderError::Task(e.to_string()))??;
        debug!(
            "Loaded read-only fragment {} ({} symbols) from {}",
            snapshot.properties.fragment_id,
            snapshot.symbol_count(),
            descriptor.location.display()
        );
        let fragment = Arc::new(IndexFragment::from_snapshot(snapshot));
        // A concurrent load of the same location keeps the first entry
        let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(
            loaded
                .entry(descriptor.location.clone())
                .or_insert(fragment),
        ))
    }
}

#[async_trait]
impl IndexFragmentProvider for ReadOnlyProviderAdapter {
    fn provider_id(&self) -> &str {
        self.inner.id()
    }

    async fn provides_for(&self, project: &Project) -> Result<bool, ProviderError> {
        self.inner.provides_for(project)
    }

    async fn index_fragments(
        &self,
        config: &ProjectConfig,
    ) -> Result<Vec<Arc<IndexFragment>>, ProviderError> {
        let descriptors = self.inner.fragment_descriptors(config)?;
        let mut fragments = Vec::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            match self.load(descriptor).await {
                Ok(fragment) => fragments.push(fragment),
                Err(e) => warn!(
                    "Skipping read-only fragment {} of provider {}: {}",
                    descriptor.name,
                    self.inner.id(),
                    e
                ),
            }
        }
        Ok(fragments)
    }
}

/// Read-only provider backed by snapshot files named in the configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotProviderConfig {
    pub id: String,
    /// Project names this provider applies to; empty means every project
    #[serde(default)]
    pub projects: Vec<String>,
    pub snapshots: Vec<PathBuf>,
}

pub struct SnapshotProvider {
    config: SnapshotProviderConfig,
}

impl SnapshotProvider {
    pub fn new(config: SnapshotProviderConfig) -> Self {
        Self { config }
    }
}

impl ReadOnlyFragmentProvider for SnapshotProvider {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn provides_for(&self, project: &Project) -> Result<bool, ProviderError> {
        Ok(self.config.projects.is_empty()
            || self.config.projects.iter().any(|name| name == project.name()))
    }

    fn fragment_descriptors(
        &self,
        _config: &ProjectConfig,
    ) -> Result<Vec<FragmentDescriptor>, ProviderError> {
        Ok(self
            .config
            .snapshots
            .iter()
            .map(|location| FragmentDescriptor {
                name: location
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                location: location.clone(),
            })
            .collect())
    }
}
