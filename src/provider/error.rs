use thiserror::Error;

use crate::fragment::FragmentError;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Failed to create fragment provider {id}: {reason}")]
    Creation { id: String, reason: String },

    #[error("Fragment provider {id} failed: {reason}")]
    Failed { id: String, reason: String },

    #[error("Fragment error: {0}")]
    Fragment(#[from] FragmentError),

    #[error("Background task failed: {0}")]
    Task(String),
}
