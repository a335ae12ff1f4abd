use thiserror::Error;

use super::ctags::CtagsError;
use super::fast::ParseError;
use crate::fragment::FragmentError;
use crate::preferences::PreferenceError;

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("No indexer registered for id: {id}")]
    UnknownIndexer { id: String },

    #[error("Failed to create {id} indexer for project {project}: {reason}")]
    CreationFailed {
        id: String,
        project: String,
        reason: String,
    },

    #[error("Fragment error: {0}")]
    Fragment(#[from] FragmentError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Ctags error: {0}")]
    Ctags(#[from] CtagsError),

    #[error("Preference error: {0}")]
    Preference(#[from] PreferenceError),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Indexer {id} failed: {reason}")]
    Failed { id: String, reason: String },
}
