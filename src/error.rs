//! Error types for the SchemaForge governance kernel.

use thiserror::Error;

/// Kernel-level errors
///
/// Step failures inside a refinement loop are never wrapped in this type; they are
/// returned to the caller exactly as the step produced them.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<config::ConfigError> for KernelError {
    fn from(err: config::ConfigError) -> Self {
        KernelError::ConfigError(err.to_string())
    }
}
