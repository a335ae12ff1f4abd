//! Resource change records delivered by the workspace
//!
//! A delta is a tree: the root usually names a project and its children name
//! folders and translation units. Consumers recurse into children themselves.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Project,
    /// A source or header file; `working_copy` marks unsaved editor buffers
    TranslationUnit { working_copy: bool },
    /// Folders and anything else that only carries children
    Other,
}

/// Phase of the workspace event that produced a delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceEventKind {
    #[default]
    PostChange,
    PreBuild,
    PostBuild,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDelta {
    pub path: PathBuf,
    pub element: ElementKind,
    pub change: ChangeKind,
    pub children: Vec<ResourceDelta>,
}

impl ResourceDelta {
    pub fn new(path: impl Into<PathBuf>, element: ElementKind, change: ChangeKind) -> Self {
        Self {
            path: path.into(),
            element,
            change,
            children: Vec::new(),
        }
    }

    pub fn project(path: impl Into<PathBuf>, change: ChangeKind) -> Self {
        Self::new(path, ElementKind::Project, change)
    }

    pub fn translation_unit(path: impl Into<PathBuf>, change: ChangeKind) -> Self {
        Self::new(
            path,
            ElementKind::TranslationUnit {
                working_copy: false,
            },
            change,
        )
    }

    pub fn working_copy(path: impl Into<PathBuf>, change: ChangeKind) -> Self {
        Self::new(path, ElementKind::TranslationUnit { working_copy: true }, change)
    }

    pub fn folder(path: impl Into<PathBuf>, change: ChangeKind) -> Self {
        Self::new(path, ElementKind::Other, change)
    }

    pub fn with_child(mut self, child: ResourceDelta) -> Self {
        self.children.push(child);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Visit this delta and all descendants depth-first
    pub fn walk<F: FnMut(&ResourceDelta)>(&self, visit: &mut F) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Paths of projects removed anywhere in this delta tree
    pub fn removed_projects(&self) -> Vec<PathBuf> {
        let mut removed = Vec::new();
        self.walk(&mut |delta| {
            if delta.element == ElementKind::Project && delta.change == ChangeKind::Removed {
                removed.push(delta.path.clone());
            }
        });
        removed
    }
}
