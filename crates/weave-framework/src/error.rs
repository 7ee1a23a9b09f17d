//! Error types for the Weave framework.
//!
//! Failures raised by user code (matchers, middleware, handlers) are caught
//! at their call site, wrapped with the identity of the entry that failed,
//! and logged. None of them ever reaches the transport.

use std::any::Any;

use thiserror::Error;

pub use tower::BoxError;

/// Errors from plugin registration and control.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A plugin with this id is already registered.
    #[error("plugin '{0}' is already registered")]
    DuplicateId(String),

    /// No plugin with this id is registered.
    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// A matcher failed while being evaluated; its handler counts as not matching.
#[derive(Debug, Error)]
#[error("matcher of handler '{handler}' in plugin '{plugin}' failed: {error}")]
pub struct MatcherError {
    pub plugin: String,
    pub handler: String,
    pub error: BoxError,
}

/// A middleware entry failed; sibling entries and later stages still run.
#[derive(Debug, Error)]
#[error("middleware of plugin '{plugin}' (priority {priority}) failed: {error}")]
pub struct MiddlewareError {
    pub plugin: String,
    pub priority: i32,
    pub error: BoxError,
}

/// A handler invocation failed.
#[derive(Debug, Error)]
#[error("handler '{handler}' in plugin '{plugin}' failed: {error}")]
pub struct HandlerError {
    pub plugin: String,
    pub handler: String,
    pub error: BoxError,
}

/// User code panicked; the panic was caught at the call boundary.
#[derive(Debug, Clone, Error)]
#[error("panicked: {0}")]
pub struct Panicked(pub String);

impl Panicked {
    /// Extracts the panic message from a `catch_unwind` payload.
    pub fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self(message)
    }
}
