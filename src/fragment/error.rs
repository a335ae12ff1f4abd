use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FragmentError {
    /// The fragment was closed while (or before) waiting for its lock
    #[error("Lock acquisition on index fragment was interrupted")]
    LockInterrupted,

    /// The calling task already holds the fragment's write side
    #[error("Index fragment write lock is already held by this task")]
    WriteReentered,

    #[error("IO error on fragment snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid fragment snapshot {path}: {reason}")]
    InvalidSnapshot { path: PathBuf, reason: String },
}
