//! Provider discovery, provisioning cache and fragment resolution

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info, trace, warn};

use super::read_only::{ReadOnlyFragmentProvider, ReadOnlyProviderAdapter};
use super::resolution::{FormatCompatibility, FragmentSelection, Resolution};
use super::{IndexFragmentProvider, ProviderError};
use crate::fragment::IndexFragment;
use crate::workspace::{Project, ProjectConfig, ResourceDelta};

pub type ProviderFactory =
    Arc<dyn Fn() -> Result<Arc<dyn IndexFragmentProvider>, ProviderError> + Send + Sync>;

pub type ReadOnlyProviderFactory =
    Arc<dyn Fn() -> Result<Arc<dyn ReadOnlyFragmentProvider>, ProviderError> + Send + Sync>;

/// A provider contribution found at startup
#[derive(Clone)]
pub enum ProviderRegistration {
    Provider {
        id: String,
        factory: ProviderFactory,
    },
    /// Wrapped in a [`ReadOnlyProviderAdapter`]
    ReadOnly {
        id: String,
        factory: ReadOnlyProviderFactory,
    },
}

impl ProviderRegistration {
    pub fn id(&self) -> &str {
        match self {
            Self::Provider { id, .. } | Self::ReadOnly { id, .. } => id,
        }
    }

    fn instantiate(&self) -> Result<Arc<dyn IndexFragmentProvider>, ProviderError> {
        match self {
            Self::Provider { factory, .. } => factory(),
            Self::ReadOnly { factory, .. } => {
                let inner = factory()?;
                Ok(Arc::new(ReadOnlyProviderAdapter::new(inner)))
            }
        }
    }
}

/// Key of the provisioning cache
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProvisionMapKey {
    pub provider_id: String,
    pub project: Project,
}

pub struct FragmentProviderManager {
    compatibility: FormatCompatibility,
    providers: RwLock<Vec<Arc<dyn IndexFragmentProvider>>>,
    /// Whether a provider contributes to a project; kept for the session
    provision_map: Mutex<HashMap<ProvisionMapKey, bool>>,
    /// Fragment ids already reported as unusable
    reported_unusable: Mutex<HashSet<String>>,
}

impl FragmentProviderManager {
    pub fn new(compatibility: FormatCompatibility) -> Self {
        Self {
            compatibility,
            providers: RwLock::new(Vec::new()),
            provision_map: Mutex::new(HashMap::new()),
            reported_unusable: Mutex::new(HashSet::new()),
        }
    }

    pub fn compatibility(&self) -> &FormatCompatibility {
        &self.compatibility
    }

    /// Instantiate the registered providers; failing ones are logged and skipped
    pub fn startup(&self, registrations: &[ProviderRegistration]) -> usize {
        let mut started = 0;
        for registration in registrations {
            match registration.instantiate() {
                Ok(provider) => {
                    info!("Registered fragment provider {}", provider.provider_id());
                    self.add_provider(provider);
                    started += 1;
                }
                Err(e) => warn!(
                    "Skipping fragment provider {}: {}",
                    registration.id(),
                    e
                ),
            }
        }
        started
    }

    pub fn add_provider(&self, provider: Arc<dyn IndexFragmentProvider>) {
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(provider);
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.providers()
            .iter()
            .map(|provider| provider.provider_id().to_string())
            .collect()
    }

    fn providers(&self) -> Vec<Arc<dyn IndexFragmentProvider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn provision_map(&self) -> MutexGuard<'_, HashMap<ProvisionMapKey, bool>> {
        self.provision_map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached answer to `provides_for`, asking the provider on a miss
    async fn provides_for(
        &self,
        provider: &dyn IndexFragmentProvider,
        project: &Project,
    ) -> Result<bool, ProviderError> {
        let key = ProvisionMapKey {
            provider_id: provider.provider_id().to_string(),
            project: project.clone(),
        };
        let cached = self.provision_map().get(&key).copied();
        if let Some(provides) = cached {
            return Ok(provides);
        }
        let provides = provider.provides_for(project).await?;
        trace!(
            "Provider {} provides for {}: {}",
            key.provider_id,
            project.name(),
            provides
        );
        self.provision_map().insert(key, provides);
        Ok(provides)
    }

    /// Resolved fragments contributed to a project
    ///
    /// A failing provider or candidate is logged and skipped; the rest are
    /// still processed.
    pub async fn get_provided_index_fragments(
        &self,
        config: &ProjectConfig,
    ) -> Vec<Arc<IndexFragment>> {
        let project = &config.project;
        let mut selection = FragmentSelection::new();

        for provider in self.providers() {
            let provider_id = provider.provider_id().to_string();
            match self.provides_for(provider.as_ref(), project).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(
                        "Provider {} failed to answer for {}: {}",
                        provider_id,
                        project.name(),
                        e
                    );
                    continue;
                }
            }

            let candidates = match provider.index_fragments(config).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(
                        "Provider {} failed to supply fragments for {}: {}",
                        provider_id,
                        project.name(),
                        e
                    );
                    continue;
                }
            };

            for candidate in candidates {
                let properties = match candidate.properties().await {
                    Ok(properties) => properties,
                    Err(e) => {
                        warn!("Skipping fragment from {}: {}", provider_id, e);
                        continue;
                    }
                };
                let fragment_id = properties.fragment_id.clone();
                let format = format!("{}/{}", properties.format_id, properties.format_version);
                match selection.offer(candidate, properties, &self.compatibility) {
                    Resolution::CrossFormatDropped => debug!(
                        "Dropping fragment {} ({}) from {}: another format is already selected",
                        fragment_id, format, provider_id
                    ),
                    resolution => trace!(
                        "Fragment {} ({}) from {}: {:?}",
                        fragment_id, format, provider_id, resolution
                    ),
                }
            }
        }

        self.report_unusable(&selection);
        selection.selected()
    }

    /// Warn once per fragment id that had no usable candidate; returns the
    /// number of new warnings
    pub fn report_unusable(&self, selection: &FragmentSelection) -> usize {
        let mut reported = self
            .reported_unusable
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut warned = 0;
        for properties in selection.unusable() {
            if reported.insert(properties.fragment_id.clone()) {
                let supported = self
                    .compatibility
                    .range(&properties.format_id)
                    .map(|range| format!("{}..={}", range.min, range.max))
                    .unwrap_or_else(|| "none".to_string());
                warn!(
                    "Index fragment {} is unusable: format {} version {} (supported: {})",
                    properties.fragment_id,
                    properties.format_id,
                    properties.format_version,
                    supported
                );
                warned += 1;
            }
        }
        warned
    }

    /// Drop cache entries for projects removed in the delta
    pub fn element_changed(&self, delta: &ResourceDelta) {
        for location in delta.removed_projects() {
            self.forget_location(&location);
        }
    }

    pub fn project_removed(&self, project: &Project) {
        let mut map = self.provision_map();
        let before = map.len();
        map.retain(|key, _| &key.project != project);
        debug!(
            "Dropped {} provisioning entries for {}",
            before - map.len(),
            project.name()
        );
    }

    fn forget_location(&self, location: &Path) {
        self.provision_map()
            .retain(|key, _| key.project.location() != location);
    }

    pub fn provision_entries(&self) -> usize {
        self.provision_map().len()
    }
}
