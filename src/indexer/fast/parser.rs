//! Parser collaborator contract
//!
//! The fast indexer does not parse C/C++ itself. It asks a
//! [`TranslationUnitParser`] for an [`Ast`] of one translation unit and merges
//! the symbols grouped per file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::fragment::IndexedSymbol;
use crate::workspace::{ContentType, Project};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {reason}")]
    Failed { path: PathBuf, reason: String },
}

/// Options for parsing in index-aware mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    /// Consult the existing fragment while merging
    pub use_index: bool,
    /// Do not re-merge headers the fragment already holds
    pub skip_indexed_headers: bool,
    /// Skip translation units without build configuration
    pub skip_if_no_build_info: bool,
    /// Ignore declarations inside function bodies
    pub skip_function_bodies: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            use_index: true,
            skip_indexed_headers: true,
            skip_if_no_build_info: true,
            skip_function_bodies: false,
        }
    }
}

impl ParseOptions {
    /// Whether already indexed headers may be left out of a merge
    pub fn skips_indexed_headers(&self) -> bool {
        self.use_index && self.skip_indexed_headers
    }
}

/// Symbols declared in one file reached while parsing a translation unit
#[derive(Debug, Clone, PartialEq)]
pub struct AstFile {
    pub path: PathBuf,
    pub symbols: Vec<IndexedSymbol>,
}

/// Declarations of a translation unit and the headers it pulls in
#[derive(Debug, Clone, PartialEq)]
pub struct Ast {
    pub translation_unit: PathBuf,
    pub language: ContentType,
    /// The translation unit first, then included headers
    pub files: Vec<AstFile>,
}

#[cfg_attr(test, mockall::automock)]
pub trait TranslationUnitParser: Send + Sync {
    /// Parse one translation unit; `Ok(None)` means there is nothing to index
    fn parse(
        &self,
        project: &Project,
        path: &Path,
        options: &ParseOptions,
    ) -> Result<Option<Ast>, ParseError>;
}
