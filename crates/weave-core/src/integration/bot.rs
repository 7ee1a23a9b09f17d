//! Outbound collaborator and the bot handle.
//!
//! The transport layer owns the connection; the engine only needs a way to
//! push payloads back out. That contract is the [`Outbound`] trait. A
//! [`Bot`] bundles one outbound with the [`ConversationRegistry`] and is
//! carried by every [`Event`](crate::Event).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::conversation::ConversationRegistry;
use crate::error::{ApiError, ApiResult};
use crate::foundation::context::RawPayload;
use crate::foundation::message::Message;

// =============================================================================
// Target
// =============================================================================

/// The destination of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// A one-to-one chat with `user_id`.
    Private { self_id: i64, user_id: i64 },
    /// A group chat.
    Group { self_id: i64, group_id: i64 },
}

impl Target {
    /// The bot account the message is sent from.
    pub fn self_id(&self) -> i64 {
        match self {
            Self::Private { self_id, .. } | Self::Group { self_id, .. } => *self_id,
        }
    }
}

// =============================================================================
// Outbound trait
// =============================================================================

/// Transport-provided outbound channel.
///
/// Only [`call_api`](Outbound::call_api) is required; message sending is
/// expressed in terms of it.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Performs a protocol action on behalf of bot account `self_id`.
    ///
    /// # Errors
    /// Returns an [`ApiError`] if the call fails, times out, or the
    /// connection is lost.
    async fn call_api(&self, self_id: i64, action: &str, params: Value) -> ApiResult<Value>;

    /// Sends `message` to `target`.
    async fn send(&self, target: &Target, message: &Message) -> ApiResult<Value> {
        let (action, params) = match target {
            Target::Private { user_id, .. } => (
                "send_private_msg",
                json!({ "user_id": user_id, "message": message }),
            ),
            Target::Group { group_id, .. } => (
                "send_group_msg",
                json!({ "group_id": group_id, "message": message }),
            ),
        };
        self.call_api(target.self_id(), action, params).await
    }

    /// Offers an inbound payload that is an API response (no `post_type`).
    ///
    /// Returns `true` if it was consumed. The default returns `false`.
    fn on_incoming_response(&self, _payload: &RawPayload) -> bool {
        false
    }
}

/// A shared, type-erased outbound.
pub type BoxedOutbound = Arc<dyn Outbound>;

/// [`Outbound`] for engines that have no connection (tests, dry runs).
///
/// Every call fails with [`ApiError::NotConnected`].
pub struct DisabledOutbound;

#[async_trait]
impl Outbound for DisabledOutbound {
    async fn call_api(&self, _self_id: i64, action: &str, _params: Value) -> ApiResult<Value> {
        debug!(action = %action, "Outbound disabled, dropping API call");
        Err(ApiError::NotConnected)
    }
}

// =============================================================================
// Bot
// =============================================================================

/// Cheap-clone handle to the outbound channel and the conversation registry.
#[derive(Clone)]
pub struct Bot {
    outbound: BoxedOutbound,
    conversations: Arc<ConversationRegistry>,
}

impl Bot {
    /// Creates a bot with its own conversation registry.
    pub fn new(outbound: BoxedOutbound) -> Self {
        Self::with_conversations(outbound, Arc::new(ConversationRegistry::new()))
    }

    /// Creates a bot sharing an existing conversation registry.
    pub fn with_conversations(
        outbound: BoxedOutbound,
        conversations: Arc<ConversationRegistry>,
    ) -> Self {
        Self {
            outbound,
            conversations,
        }
    }

    /// A bot whose outbound rejects every call.
    pub fn disabled() -> Self {
        Self::new(Arc::new(DisabledOutbound))
    }

    /// Returns the conversation registry.
    pub fn conversations(&self) -> &Arc<ConversationRegistry> {
        &self.conversations
    }

    /// Returns the outbound channel.
    pub fn outbound(&self) -> &BoxedOutbound {
        &self.outbound
    }

    /// See [`Outbound::call_api`].
    pub async fn call_api(&self, self_id: i64, action: &str, params: Value) -> ApiResult<Value> {
        self.outbound.call_api(self_id, action, params).await
    }

    /// See [`Outbound::send`].
    pub async fn send(&self, target: &Target, message: &Message) -> ApiResult<Value> {
        self.outbound.send(target, message).await
    }

    /// See [`Outbound::on_incoming_response`].
    pub fn route_response(&self, payload: &RawPayload) -> bool {
        self.outbound.on_incoming_response(payload)
    }
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("pending_conversations", &self.conversations.len())
            .finish_non_exhaustive()
    }
}
