//! Unified error types for the Weave core.
//!
//! Framework-level errors (registry, matcher, middleware, handler failures)
//! are defined in `weave-framework`.

use thiserror::Error;

use crate::conversation::ConversationKey;

// =============================================================================
// API Errors
// =============================================================================

/// Error type for outbound API calls.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The bot is not connected.
    #[error("bot is not connected")]
    NotConnected,
    /// The API call timed out.
    #[error("API call timed out")]
    Timeout,
    /// The API returned an error.
    #[error("API error ({retcode}): {message}")]
    Api { retcode: i64, message: String },
    /// Failed to serialize/deserialize.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The event does not carry enough information for this call.
    #[error("operation not supported for this event")]
    NotSupported,
    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Conversation Errors
// =============================================================================

/// Errors produced by the conversation registry.
///
/// A deferral that times out is **not** an error: it resolves to `Ok(None)`.
#[derive(Debug, Clone, Error)]
pub enum ConversationError {
    /// Another deferral is already pending for this conversation.
    #[error("a deferral is already pending for conversation {0}")]
    Conflict(ConversationKey),

    /// The suspension was cancelled (shutdown, or the registry was torn down).
    #[error("deferral cancelled")]
    Cancelled,

    /// The event has no conversation identity, so nothing can be awaited on it.
    #[error("event does not belong to a conversation")]
    NoConversation,

    /// The configured limit of concurrent suspensions was reached.
    #[error("too many pending conversations (limit {limit})")]
    Saturated {
        /// The configured limit.
        limit: usize,
    },

    /// The prompt could not be delivered; the slot has been released.
    #[error("failed to send prompt: {0}")]
    Prompt(#[from] ApiError),
}

impl ConversationError {
    /// Returns `true` for the cancellation signal raised on shutdown.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for API calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type for conversation operations.
pub type ConversationResult<T> = Result<T, ConversationError>;
