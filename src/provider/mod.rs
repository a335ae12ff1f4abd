//! Contributed index fragments
//!
//! Providers contribute read-only fragments for projects. The
//! [`FragmentProviderManager`] asks every registered provider for candidates
//! and resolves them into at most one fragment per fragment id.

pub mod error;
pub mod manager;
pub mod read_only;
pub mod resolution;

use async_trait::async_trait;
use std::sync::Arc;

use crate::fragment::IndexFragment;
use crate::workspace::{Project, ProjectConfig};

pub use error::ProviderError;
pub use manager::{FragmentProviderManager, ProviderRegistration};
pub use read_only::{ReadOnlyFragmentProvider, SnapshotProvider, SnapshotProviderConfig};
pub use resolution::{FormatCompatibility, VersionRange};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IndexFragmentProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    /// Whether this provider contributes anything to the project
    async fn provides_for(&self, project: &Project) -> Result<bool, ProviderError>;

    async fn index_fragments(
        &self,
        config: &ProjectConfig,
    ) -> Result<Vec<Arc<IndexFragment>>, ProviderError>;
}
