//! Configuration error types.

use thiserror::Error;

/// Errors raised while loading or validating configuration.
///
/// Configuration defects are deliberately fatal: a consumer running against
/// a half-valid configuration risks silently misrouting or losing jobs.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Failed to read configuration file '{path}': {message}")]
    FileRead { path: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("No failure strategy available for queue '{queue}': {detail}")]
    MissingStrategy { queue: String, detail: String },
}

impl ConfigurationError {
    pub fn file_read(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FileRead {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    pub fn missing_strategy(queue: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::MissingStrategy {
            queue: queue.into(),
            detail: detail.into(),
        }
    }
}

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigurationError>;
