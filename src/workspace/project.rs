use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Identity of a workspace project
///
/// Projects are owned by the workspace; the index manager only uses them as
/// keys for per-project state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Project {
    name: String,
    location: PathBuf,
}

impl Project {
    pub fn new(name: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root directory of the project's sources
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Check whether a path lies inside the project location
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.location)
    }
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.location.display())
    }
}

/// A project together with its active build configuration
///
/// Fragment providers receive this instead of the bare project so they can
/// contribute configuration-specific fragments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectConfig {
    pub project: Project,
    pub configuration: String,
}

impl ProjectConfig {
    pub const DEFAULT_CONFIGURATION: &'static str = "default";

    pub fn new(project: Project, configuration: impl Into<String>) -> Self {
        Self {
            project,
            configuration: configuration.into(),
        }
    }

    pub fn default_for(project: Project) -> Self {
        Self::new(project, Self::DEFAULT_CONFIGURATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_contains() {
        let project = Project::new("demo", "/work/demo");
        assert!(project.contains(Path::new("/work/demo/src/a.cpp")));
        assert!(!project.contains(Path::new("/work/other/a.cpp")));
        assert_eq!(project.to_string(), "demo (/work/demo)");
    }

    #[test]
    fn test_default_configuration() {
        let config = ProjectConfig::default_for(Project::new("demo", "/work/demo"));
        assert_eq!(config.configuration, "default");
        assert_eq!(config.project.name(), "demo");
    }
}
