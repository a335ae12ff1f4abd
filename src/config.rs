//! Index manager configuration
//!
//! Loaded from an optional JSON file; every field has a default so a partial
//! file (or none at all) is valid.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::indexer::{FastIndexer, IndexerRegistry, ParseOptions};
use crate::provider::{
    FormatCompatibility, ProviderError, ProviderRegistration, ReadOnlyFragmentProvider,
    SnapshotProvider, SnapshotProviderConfig, VersionRange,
};
use crate::scheduler::SchedulerConfig;
use crate::workspace::ExtensionClassifier;

/// State directory used when none is configured, relative to the workspace root
pub const DEFAULT_STATE_DIR: &str = ".cindex";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Indexer alias {alias} points to unknown indexer {target}")]
    UnknownAliasTarget { alias: String, target: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Indexer id for projects without an `indexer.id` preference
    pub default_indexer: String,
    pub scheduler: SchedulerConfig,
    /// Directory for internal tag files; relative paths resolve against the root
    pub state_dir: Option<PathBuf>,
    /// Supported fragment versions by format id, added to the built-in range
    pub format_ranges: BTreeMap<String, VersionRange>,
    /// Extra ids resolving to registered indexers
    pub indexer_aliases: BTreeMap<String, String>,
    pub snapshot_providers: Vec<SnapshotProviderConfig>,
    pub parse_options: ParseOptions,
    pub c_extensions: Vec<String>,
    pub cxx_extensions: Vec<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_indexer: FastIndexer::ID.to_string(),
            scheduler: SchedulerConfig::default(),
            state_dir: None,
            format_ranges: BTreeMap::new(),
            indexer_aliases: BTreeMap::new(),
            snapshot_providers: Vec::new(),
            parse_options: ParseOptions::default(),
            c_extensions: Vec::new(),
            cxx_extensions: Vec::new(),
        }
    }
}

impl ManagerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn state_dir_for(&self, root: &Path) -> PathBuf {
        match &self.state_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => root.join(dir),
            None => root.join(DEFAULT_STATE_DIR),
        }
    }

    pub fn compatibility(&self) -> FormatCompatibility {
        let mut compatibility = FormatCompatibility::default();
        compatibility.extend(self.format_ranges.clone());
        compatibility
    }

    /// Built-in back-ends plus configured aliases
    pub fn registry(&self) -> Result<IndexerRegistry, ConfigError> {
        let mut registry = IndexerRegistry::builtin();
        for (alias, target) in &self.indexer_aliases {
            registry.alias(alias.as_str(), target.as_str());
        }
        for (alias, target) in &self.indexer_aliases {
            if !registry.contains(alias) {
                return Err(ConfigError::UnknownAliasTarget {
                    alias: alias.clone(),
                    target: target.clone(),
                });
            }
        }
        Ok(registry)
    }

    pub fn classifier(&self) -> ExtensionClassifier {
        let classifier = self
            .c_extensions
            .iter()
            .fold(ExtensionClassifier::new(), |c, ext| c.with_c_extension(ext));
        self.cxx_extensions
            .iter()
            .fold(classifier, |c, ext| c.with_cxx_extension(ext))
    }

    pub fn provider_registrations(&self) -> Vec<ProviderRegistration> {
        self.snapshot_providers
            .iter()
            .map(|provider| {
                let provider = provider.clone();
                ProviderRegistration::ReadOnly {
                    id: provider.id.clone(),
                    factory: Arc::new(
                        move || -> Result<Arc<dyn ReadOnlyFragmentProvider>, ProviderError> {
                            Ok(Arc::new(SnapshotProvider::new(provider.clone())))
                        },
                    ),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::{ContentType, ContentTypeClassifier};

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cindex.json");
        fs::write(
            &path,
            r#"{
                "default_indexer": "ctags",
                "scheduler": { "workers": 4 },
                "format_ranges": { "vendor.pdom": { "min": 1, "max": 2 } },
                "indexer_aliases": { "full": "fast" },
                "cxx_extensions": ["cu"]
            }"#,
        )
        .unwrap();

        let config = ManagerConfig::load(&path).unwrap();
        assert_eq!(config.default_indexer, "ctags");
        assert_eq!(config.scheduler.workers, 4);
        assert_eq!(
            config.scheduler.idle_poll_interval_ms,
            SchedulerConfig::default().idle_poll_interval_ms
        );
        assert_eq!(config.parse_options, ParseOptions::default());

        let compat = config.compatibility();
        assert_eq!(compat.range("vendor.pdom"), Some(VersionRange::new(1, 2)));
        assert!(compat.range(crate::fragment::FRAGMENT_FORMAT_ID).is_some());

        assert_eq!(config.registry().unwrap().resolve("full"), Some("fast"));
        assert_eq!(
            config.classifier().classify("kernel.cu"),
            Some(ContentType::CxxSource)
        );
    }

    #[test]
    fn test_invalid_json_and_dangling_alias() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ManagerConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            ManagerConfig::load(&dir.path().join("absent.json")),
            Err(ConfigError::Io { .. })
        ));

        let mut config = ManagerConfig::default();
        config
            .indexer_aliases
            .insert("clang".to_string(), "libclang".to_string());
        assert!(matches!(
            config.registry(),
            Err(ConfigError::UnknownAliasTarget { .. })
        ));
    }

    #[test]
    fn test_state_dir_resolution() {
        let mut config = ManagerConfig::default();
        assert_eq!(
            config.state_dir_for(Path::new("/w")),
            PathBuf::from("/w/.cindex")
        );
        config.state_dir = Some(PathBuf::from("cache"));
        assert_eq!(config.state_dir_for(Path::new("/w")), PathBuf::from("/w/cache"));
        config.state_dir = Some(PathBuf::from("/var/cindex"));
        assert_eq!(
            config.state_dir_for(Path::new("/w")),
            PathBuf::from("/var/cindex")
        );
    }

    #[test]
    fn test_snapshot_providers_become_registrations() {
        let mut config = ManagerConfig::default();
        config.snapshot_providers.push(SnapshotProviderConfig {
            id: "sdk".to_string(),
            projects: Vec::new(),
            snapshots: vec![PathBuf::from("/sdk/index.json")],
        });
        let registrations = config.provider_registrations();
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].id(), "sdk");
    }
}
