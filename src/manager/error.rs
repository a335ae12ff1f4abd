use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to build declaration scanner: {0}")]
    Scanner(#[from] regex::Error),
}
