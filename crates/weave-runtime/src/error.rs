//! Runtime error types.

use thiserror::Error;
use weave_framework::RegistryError;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Plugin registration or control failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Inbound text is not valid JSON.
    #[error("Invalid inbound payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// Inbound JSON is not an object.
    #[error("Inbound payload must be a JSON object")]
    NotAnObject,

    /// The runtime has been shut down.
    #[error("Runtime has been shut down")]
    Stopped,
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
