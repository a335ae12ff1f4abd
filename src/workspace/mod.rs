//! Workspace collaborator contracts
//!
//! The index manager never discovers files on its own. Projects, resource
//! deltas, content-type classification and build information arrive through
//! the types in this module.

pub mod compilation_database;
pub mod content_type;
pub mod delta;
pub mod project;

pub use compilation_database::CompilationDatabase;
pub use content_type::{ContentType, ContentTypeClassifier, ExtensionClassifier};
pub use delta::{ChangeKind, ElementKind, ResourceDelta, ResourceEventKind};
pub use project::{Project, ProjectConfig};
