use json_compilation_db::Entry;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum CompilationDatabaseError {
    #[error("Compilation database file not found: {path}")]
    FileNotFound { path: String },
    #[error("Failed to read compilation database file: {error}")]
    ReadError { error: String },
    #[error("Failed to parse compilation database JSON: {error}")]
    ParseError { error: String },
    #[error("Compilation database is empty")]
    EmptyDatabase,
}

/// Locations searched by [`CompilationDatabase::discover`], relative to a project root
const DISCOVERY_CANDIDATES: &[&str] = &["compile_commands.json", "build/compile_commands.json"];

/// Build information for a project, backed by `compile_commands.json`
///
/// A translation unit "has build info" when the database holds an entry for it.
#[derive(Debug)]
pub struct CompilationDatabase {
    /// Path to the compilation database file
    pub path: PathBuf,
    /// Parsed entries (loaded at initialization)
    pub entries: Vec<Entry>,
}

impl CompilationDatabase {
    /// Load and parse the compilation database at the given path
    pub fn new(path: PathBuf) -> Result<Self, CompilationDatabaseError> {
        if !path.exists() {
            return Err(CompilationDatabaseError::FileNotFound {
                path: path.to_string_lossy().to_string(),
            });
        }

        let file = std::fs::File::open(&path).map_err(|e| CompilationDatabaseError::ReadError {
            error: e.to_string(),
        })?;

        let reader = std::io::BufReader::new(file);
        let entries: Vec<Entry> =
            serde_json::from_reader(reader).map_err(|e| CompilationDatabaseError::ParseError {
                error: e.to_string(),
            })?;

        if entries.is_empty() {
            return Err(CompilationDatabaseError::EmptyDatabase);
        }

        Ok(Self { path, entries })
    }

    /// Look for a compilation database in the usual places under a project root
    pub fn discover(project_root: &Path) -> Option<Self> {
        DISCOVERY_CANDIDATES
            .iter()
            .map(|candidate| project_root.join(candidate))
            .filter(|path| path.is_file())
            .find_map(|path| match Self::new(path.clone()) {
                Ok(db) => Some(db),
                Err(e) => {
                    debug!("Ignoring compilation database {}: {}", path.display(), e);
                    None
                }
            })
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the database holds an entry for the file
    ///
    /// Relative entry paths are resolved against the entry's directory.
    pub fn contains_file(&self, file_path: &Path) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.file == file_path || Self::absolute_file(entry) == file_path)
    }

    /// All unique source files referenced in the database, resolved to absolute paths
    pub fn source_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.entries.iter().map(Self::absolute_file).collect();
        files.sort();
        files.dedup();
        files
    }

    fn absolute_file(entry: &Entry) -> PathBuf {
        if entry.file.is_absolute() {
            entry.file.clone()
        } else {
            entry.directory.join(&entry.file)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_compilation_db(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        temp_file
            .write_all(content.as_bytes())
            .expect("Failed to write to temp file");
        temp_file
    }

    #[test]
    fn test_new_with_valid_json() {
        let content = r#"[
            {
                "directory": "/home/user/project",
                "file": "src/main.cpp",
                "arguments": ["clang++", "-c", "src/main.cpp"]
            },
            {
                "directory": "/home/user/project",
                "file": "/home/user/project/src/lib.cpp",
                "command": "clang++ -c src/lib.cpp"
            }
        ]"#;

        let temp_file = create_temp_compilation_db(content);
        let db = CompilationDatabase::new(temp_file.path().to_path_buf()).unwrap();

        assert_eq!(db.entry_count(), 2);
        assert!(db.contains_file(Path::new("/home/user/project/src/main.cpp")));
        assert!(db.contains_file(Path::new("/home/user/project/src/lib.cpp")));
        assert!(!db.contains_file(Path::new("/home/user/project/src/other.cpp")));
    }

    #[test]
    fn test_new_with_nonexistent_file() {
        let db = CompilationDatabase::new(PathBuf::from("/nonexistent/path/compile_commands.json"));

        match db.unwrap_err() {
            CompilationDatabaseError::FileNotFound { path } => {
                assert!(path.contains("nonexistent"));
            }
            other => panic!("Expected FileNotFound error, got {other:?}"),
        }
    }

    #[test]
    fn test_new_with_invalid_json() {
        let temp_file = create_temp_compilation_db(r#"{ "not": ["an", "array"] }"#);
        let db = CompilationDatabase::new(temp_file.path().to_path_buf());
        assert!(matches!(db, Err(CompilationDatabaseError::ParseError { .. })));
    }

    #[test]
    fn test_new_with_empty_array() {
        let temp_file = create_temp_compilation_db("[]");
        let db = CompilationDatabase::new(temp_file.path().to_path_buf());
        assert!(matches!(db, Err(CompilationDatabaseError::EmptyDatabase)));
    }

    #[test]
    fn test_source_files_deduplication() {
        let content = r#"[
            {"directory": "/p", "file": "src/main.cpp", "arguments": ["clang++", "-c", "src/main.cpp"]},
            {"directory": "/p", "file": "src/main.cpp", "arguments": ["clang++", "-O2", "-c", "src/main.cpp"]},
            {"directory": "/p", "file": "src/lib.cpp", "command": "clang++ -c src/lib.cpp"}
        ]"#;

        let temp_file = create_temp_compilation_db(content);
        let db = CompilationDatabase::new(temp_file.path().to_path_buf()).unwrap();

        assert_eq!(
            db.source_files(),
            vec![PathBuf::from("/p/src/lib.cpp"), PathBuf::from("/p/src/main.cpp")]
        );
    }

    #[test]
    fn test_discover_in_build_directory() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("build")).unwrap();
        std::fs::write(
            root.path().join("build/compile_commands.json"),
            r#"[{"directory": "/p", "file": "a.c", "arguments": ["cc", "-c", "a.c"]}]"#,
        )
        .unwrap();

        let db = CompilationDatabase::discover(root.path()).expect("database should be found");
        assert_eq!(db.entry_count(), 1);
        assert!(CompilationDatabase::discover(&root.path().join("build/missing")).is_none());
    }
}
