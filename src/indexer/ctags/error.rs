use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CtagsError {
    #[error("ctags executable not found: {command}")]
    CommandNotFound { command: PathBuf },

    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    ExitStatus {
        command: PathBuf,
        status: String,
        stderr: String,
    },

    #[error("IO error on tag file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
