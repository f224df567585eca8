//! Error types for loading and validating models.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for model operations.
pub type ModelsResult<T> = Result<T, ModelsError>;

/// Errors raised while reading or validating configuration.
#[derive(Debug, Error)]
pub enum ModelsError {
    #[error("Failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("Invalid config value for {field}: {message}")]
    InvalidConfig { field: &'static str, message: String },
}

impl ModelsError {
    /// Create an invalid config error.
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            message: message.into(),
        }
    }
}
