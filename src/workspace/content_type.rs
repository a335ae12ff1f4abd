//! Source file classification by name

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    CSource,
    CxxSource,
}

/// Decides whether a file name denotes an indexable C or C++ file
#[cfg_attr(test, mockall::automock)]
pub trait ContentTypeClassifier: Send + Sync {
    fn classify(&self, file_name: &str) -> Option<ContentType>;
}

/// Check a path against a classifier using its file name
pub fn is_indexable(classifier: &dyn ContentTypeClassifier, path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| classifier.classify(name))
        .is_some()
}

/// Classifier driven by file extensions
///
/// Upper-case `.C` and `.H` are C++ by convention; every other extension is
/// matched case-insensitively.
#[derive(Debug, Clone)]
pub struct ExtensionClassifier {
    c_extensions: HashSet<String>,
    cxx_extensions: HashSet<String>,
}

impl Default for ExtensionClassifier {
    fn default() -> Self {
        let c_extensions = ["c", "h"].iter().map(|s| s.to_string()).collect();
        let cxx_extensions = [
            "cpp", "cc", "cxx", "c++", "cp", "hpp", "hh", "hxx", "h++", "inl", "ipp", "tcc",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        Self {
            c_extensions,
            cxx_extensions,
        }
    }
}

impl ExtensionClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cxx_extension(mut self, extension: &str) -> Self {
        self.cxx_extensions.insert(extension.to_ascii_lowercase());
        self
    }

    pub fn with_c_extension(mut self, extension: &str) -> Self {
        self.c_extensions.insert(extension.to_ascii_lowercase());
        self
    }
}

impl ContentTypeClassifier for ExtensionClassifier {
    fn classify(&self, file_name: &str) -> Option<ContentType> {
        let extension = Path::new(file_name).extension()?.to_str()?;
        if extension == "C" || extension == "H" {
            return Some(ContentType::CxxSource);
        }
        let extension = extension.to_ascii_lowercase();
        if self.cxx_extensions.contains(&extension) {
            Some(ContentType::CxxSource)
        } else if self.c_extensions.contains(&extension) {
            Some(ContentType::CSource)
        } else {
            None
        }
    }
}
