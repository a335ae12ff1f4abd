//! JSON snapshots of fragment content
//!
//! Snapshots are an interchange format: they let one workspace hand a
//! fragment to another (through a read-only provider) and back the CLI
//! `export` command. They are not the persisted index itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::content::{FragmentContent, FragmentProperties, IndexFragment};
use super::error::FragmentError;
use super::symbol::IndexedSymbol;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentSnapshot {
    pub properties: FragmentProperties,
    pub exported_at: DateTime<Utc>,
    pub files: BTreeMap<PathBuf, Vec<IndexedSymbol>>,
}

impl FragmentSnapshot {
    pub fn save(&self, path: &Path) -> Result<(), FragmentError> {
        let io_error = |source| FragmentError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(io_error)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self).map_err(|e| {
            FragmentError::InvalidSnapshot {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        debug!(
            "Saved fragment snapshot {} to {}",
            self.properties.fragment_id,
            path.display()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, FragmentError> {
        let file = File::open(path).map_err(|source| FragmentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| FragmentError::InvalidSnapshot {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn symbol_count(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }
}

impl IndexFragment {
    /// Capture the fragment's content under its read lock
    pub async fn snapshot(&self) -> Result<FragmentSnapshot, FragmentError> {
        let content = self.acquire_read().await?;
        Ok(FragmentSnapshot {
            properties: content.properties().clone(),
            exported_at: Utc::now(),
            files: content
                .files()
                .iter()
                .map(|(file, symbols)| (file.clone(), symbols.as_ref().clone()))
                .collect(),
        })
    }

    pub fn from_snapshot(snapshot: FragmentSnapshot) -> Self {
        Self::from_content(FragmentContent::from_parts(
            snapshot.properties,
            snapshot.files,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::symbol::{SymbolKind, SymbolLocation, SymbolOrigin};

    #[tokio::test]
    async fn test_snapshot_survives_save_and_load() {
        let fragment = IndexFragment::new(FragmentProperties::new("sdk", "cindex.fragment", 2));
        fragment.acquire_write().await.unwrap().replace_file(
            PathBuf::from("/sdk/api.h"),
            vec![IndexedSymbol {
                name: "sdk_init".to_string(),
                kind: SymbolKind::Prototype,
                file: PathBuf::from("/sdk/api.h"),
                location: SymbolLocation::LineNumber(12),
                scope: None,
                origin: SymbolOrigin::Ctags,
            }],
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sdk.json");
        fragment.snapshot().await.unwrap().save(&path).unwrap();

        let loaded = IndexFragment::from_snapshot(FragmentSnapshot::load(&path).unwrap());
        let properties = loaded.properties().await.unwrap();
        assert_eq!(properties.fragment_id, "sdk");
        assert_eq!(properties.format_version, 2);

        let found = loaded.find_symbols("sdk_init").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].location, SymbolLocation::LineNumber(12));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            FragmentSnapshot::load(&path),
            Err(FragmentError::InvalidSnapshot { .. })
        ));
        assert!(matches!(
            FragmentSnapshot::load(&dir.path().join("missing.json")),
            Err(FragmentError::Io { .. })
        ));
    }
}
