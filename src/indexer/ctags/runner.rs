//! Invocation of the external ctags executable

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::error::CtagsError;

/// Arguments shared by single-file and project runs
const COMMON_ARGS: &[&str] = &[
    "--languages=C,C++",
    "--fields=+Kns",
    "--c-kinds=+px",
    "--c++-kinds=+px",
    "--excmd=number",
    "--sort=no",
];

#[derive(Debug, Clone)]
pub struct CtagsRunner {
    command: PathBuf,
}

impl CtagsRunner {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Tags for one file, written to stdout. `None` when cancelled.
    pub async fn tag_file(
        &self,
        file: &Path,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, CtagsError> {
        let mut command = self.base_command();
        command.arg("-f").arg("-").arg(file);
        let Some(output) = self.run(command, cancel).await? else {
            return Ok(None);
        };
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }

    /// Write tags for every source below `root` into `tag_file`.
    /// Returns `false` when cancelled.
    pub async fn tag_tree(
        &self,
        root: &Path,
        tag_file: &Path,
        cancel: &CancellationToken,
    ) -> Result<bool, CtagsError> {
        if let Some(parent) = tag_file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| CtagsError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let mut command = self.base_command();
        command.arg("-R").arg("-f").arg(tag_file).arg(root);
        Ok(self.run(command, cancel).await?.is_some())
    }

    fn base_command(&self) -> Command {
        let mut command = Command::new(&self.command);
        command
            .args(COMMON_ARGS)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    async fn run(
        &self,
        mut command: Command,
        cancel: &CancellationToken,
    ) -> Result<Option<Output>, CtagsError> {
        trace!("Running {:?}", command);
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("ctags run cancelled; killing {}", self.command.display());
                return Ok(None);
            }
            output = command.output() => output,
        };
        let output = output.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                CtagsError::CommandNotFound {
                    command: self.command.clone(),
                }
            } else {
                CtagsError::Spawn {
                    command: self.command.clone(),
                    source,
                }
            }
        })?;

        if !output.status.success() {
            return Err(CtagsError::ExitStatus {
                command: self.command.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(Some(output))
    }
}
