//! The typed event view.
//!
//! An [`Event`] is a read-only view built from a [`Context`] at dispatch
//! time. It keeps a back-reference to that context, so requests made through
//! the event (such as [`Event::clear`]) are visible to the pipeline, and it
//! carries the [`Bot`] handle used for replies and deferrals.
//!
//! ```rust,ignore
//! async fn guess(event: Event) -> Result<(), BoxError> {
//!     let Some(reply) = event
//!         .defer(Some("Pick a number [0-10]".into()), Some(Duration::from_secs(30)))
//!         .await?
//!     else {
//!         event.send("Too slow!").await?;
//!         return Ok(());
//!     };
//!     event.send(format!("You said {}", reply.text())).await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::context::{Context, RawPayload};
use super::kind::{EventCategory, EventKind};
use super::message::Message;
use crate::conversation::ConversationKey;
use crate::error::{ApiError, ApiResult, ConversationResult};
use crate::integration::bot::{Bot, Target};

// ============================================================================
// Sender
// ============================================================================

/// The `sender` record attached to message events.
///
/// Every field is optional; gateways populate different subsets.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Sender {
    pub user_id: Option<i64>,
    pub nickname: Option<String>,
    /// Group card (nickname inside the group).
    pub card: Option<String>,
    pub sex: Option<String>,
    pub age: Option<i64>,
    pub area: Option<String>,
    pub level: Option<String>,
    /// Group role: `"owner"`, `"admin"` or `"member"`.
    pub role: Option<String>,
    pub title: Option<String>,
}

impl Sender {
    /// Returns the card if set, otherwise the nickname.
    pub fn display_name(&self) -> Option<&str> {
        self.card
            .as_deref()
            .filter(|card| !card.is_empty())
            .or(self.nickname.as_deref())
    }
}

// ============================================================================
// Event
// ============================================================================

/// A typed, read-only view over one inbound payload.
///
/// Cloning is cheap: the payload snapshot, context and bot are all shared.
#[derive(Clone)]
pub struct Event {
    kind: EventKind,
    data: Arc<RawPayload>,
    ctx: Arc<Context>,
    bot: Bot,
}

impl Event {
    /// Builds an event from the current state of `ctx`.
    pub fn new(ctx: Arc<Context>, bot: Bot) -> Self {
        let data = ctx.snapshot();
        Self {
            kind: EventKind::classify(&data),
            data: Arc::new(data),
            ctx,
            bot,
        }
    }

    /// Convenience constructor wrapping a payload in a fresh context.
    pub fn from_payload(payload: RawPayload, bot: Bot) -> Self {
        Self::new(Arc::new(Context::new(payload)), bot)
    }

    /// Rebuilds the view from the context, picking up mutations made since
    /// this event was constructed.
    #[must_use]
    pub fn refresh(&self) -> Self {
        Self::new(Arc::clone(&self.ctx), self.bot.clone())
    }

    // ─── Classification ──────────────────────────────────────────────────────

    /// Returns the event variant.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Returns the high-level category.
    pub fn category(&self) -> EventCategory {
        self.kind.category()
    }

    /// Returns `true` for message events.
    pub fn is_message(&self) -> bool {
        self.category() == EventCategory::Message
    }

    // ─── Raw access ──────────────────────────────────────────────────────────

    /// Returns the payload snapshot this event was built from.
    pub fn data(&self) -> &RawPayload {
        &self.data
    }

    /// Returns the raw value under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Returns the string value under `key`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Returns the integer value under `key`.
    ///
    /// Numeric strings are accepted; some gateways quote large ids.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Deserializes the value under `key`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|value| T::deserialize(value).ok())
    }

    // ─── Common fields ───────────────────────────────────────────────────────

    /// Unix timestamp of the event (0 when absent).
    pub fn time(&self) -> i64 {
        self.get_i64("time").unwrap_or_default()
    }

    /// Id of the bot account that received the event (0 when absent).
    pub fn self_id(&self) -> i64 {
        self.get_i64("self_id").unwrap_or_default()
    }

    pub fn user_id(&self) -> Option<i64> {
        self.get_i64("user_id")
    }

    pub fn group_id(&self) -> Option<i64> {
        self.get_i64("group_id")
    }

    pub fn message_id(&self) -> Option<i64> {
        self.get_i64("message_id")
    }

    pub fn sub_type(&self) -> Option<&str> {
        self.get_str("sub_type")
    }

    /// Parsed message segments (empty for non-message events).
    pub fn message(&self) -> Message {
        self.get("message")
            .map(Message::from_value)
            .unwrap_or_default()
    }

    /// Concatenated text of the message.
    pub fn text(&self) -> String {
        self.message().plain_text()
    }

    /// The typed sender record of a message event.
    pub fn sender(&self) -> Option<Sender> {
        self.get_as("sender")
    }

    // ─── Conversation identity ───────────────────────────────────────────────

    /// The conversation this event belongs to.
    ///
    /// Group messages are keyed by group and sender, private messages by
    /// sender alone. Other events have no conversation.
    pub fn conversation_key(&self) -> Option<ConversationKey> {
        match self.kind {
            EventKind::GroupMessage => Some(ConversationKey::Group {
                group_id: self.group_id()?,
                user_id: self.user_id()?,
            }),
            EventKind::PrivateMessage => Some(ConversationKey::User {
                user_id: self.user_id()?,
            }),
            _ => None,
        }
    }

    /// Where a reply to this event goes.
    pub fn target(&self) -> Option<Target> {
        let self_id = self.self_id();
        match (self.group_id(), self.user_id()) {
            (Some(group_id), _) if self.kind != EventKind::PrivateMessage => {
                Some(Target::Group { self_id, group_id })
            }
            (_, Some(user_id)) => Some(Target::Private { self_id, user_id }),
            _ => None,
        }
    }

    // ─── Pipeline interaction ────────────────────────────────────────────────

    /// Returns the originating context.
    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// Marks the originating context cleared.
    pub fn clear(&self) {
        self.ctx.clear();
    }

    /// Returns the bot handle.
    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    // ─── Outbound ────────────────────────────────────────────────────────────

    /// Sends `message` to this event's conversation.
    pub async fn send(&self, message: impl Into<Message>) -> ApiResult<Value> {
        let target = self.target().ok_or(ApiError::NotSupported)?;
        self.bot.send(&target, &message.into().compact()).await
    }

    /// Suspends until the next event of this conversation arrives.
    ///
    /// `prompt`, when given, is sent after the slot is reserved. Resolves to
    /// `Ok(None)` if `timeout` elapses first.
    ///
    /// # Errors
    ///
    /// [`ConversationError::Conflict`] if this conversation is already
    /// waiting, [`ConversationError::Cancelled`] on shutdown.
    ///
    /// [`ConversationError::Conflict`]: crate::ConversationError::Conflict
    /// [`ConversationError::Cancelled`]: crate::ConversationError::Cancelled
    pub async fn defer(
        &self,
        prompt: Option<Message>,
        timeout: Option<Duration>,
    ) -> ConversationResult<Option<Event>> {
        let key = self
            .conversation_key()
            .ok_or(crate::ConversationError::NoConversation)?;
        let prompt = prompt.map(|message| {
            Box::pin(async move { self.send(message).await.map(|_| ()) })
                as crate::conversation::Prompt<'_>
        });
        self.bot.conversations().defer(key, prompt, timeout).await
    }

    /// Approves a friend or group request.
    pub async fn approve(&self, remark: Option<&str>) -> ApiResult<Value> {
        self.answer_request(true, remark).await
    }

    /// Rejects a friend or group request.
    pub async fn reject(&self, reason: Option<&str>) -> ApiResult<Value> {
        self.answer_request(false, reason).await
    }

    async fn answer_request(&self, approve: bool, note: Option<&str>) -> ApiResult<Value> {
        let flag = self.get_str("flag").ok_or(ApiError::NotSupported)?;
        let (action, params) = match self.kind {
            EventKind::FriendRequest => (
                "set_friend_add_request",
                json!({ "flag": flag, "approve": approve, "remark": note }),
            ),
            EventKind::GroupRequest => (
                "set_group_add_request",
                json!({
                    "flag": flag,
                    "sub_type": self.sub_type(),
                    "approve": approve,
                    "reason": note,
                }),
            ),
            _ => return Err(ApiError::NotSupported),
        };
        self.bot.call_api(self.self_id(), action, params).await
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind)
            .field("self_id", &self.self_id())
            .field("user_id", &self.user_id())
            .field("group_id", &self.group_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::bot::tests::RecordingOutbound;

    fn payload(value: Value) -> RawPayload {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn group_message(text: &str) -> RawPayload {
        payload(json!({
            "time": 1700000000,
            "self_id": 10000,
            "post_type": "message",
            "message_type": "group",
            "sub_type": "normal",
            "message_id": 7,
            "group_id": 200,
            "user_id": 300,
            "message": [{ "type": "text", "data": { "text": text } }],
            "raw_message": text,
            "sender": { "user_id": 300, "nickname": "alice", "role": "member" }
        }))
    }

    #[test]
    fn test_group_message_fields() {
        let event = Event::from_payload(group_message("hello"), Bot::disabled());
        assert_eq!(event.kind(), EventKind::GroupMessage);
        assert_eq!(event.self_id(), 10000);
        assert_eq!(event.text(), "hello");
        assert_eq!(
            event.conversation_key(),
            Some(ConversationKey::Group {
                group_id: 200,
                user_id: 300
            })
        );
        assert_eq!(
            event.target(),
            Some(Target::Group {
                self_id: 10000,
                group_id: 200
            })
        );
        let sender = event.sender().unwrap();
        assert_eq!(sender.role.as_deref(), Some("member"));
        assert_eq!(sender.display_name(), Some("alice"));
    }

    #[test]
    fn test_private_message_key_is_user() {
        let event = Event::from_payload(
            payload(json!({
                "post_type": "message",
                "message_type": "private",
                "user_id": "55",
                "message": "hi"
            })),
            Bot::disabled(),
        );
        assert_eq!(
            event.conversation_key(),
            Some(ConversationKey::User { user_id: 55 })
        );
        assert_eq!(event.text(), "hi");
    }

    #[test]
    fn test_notice_has_no_conversation() {
        let event = Event::from_payload(
            payload(json!({
                "post_type": "notice",
                "notice_type": "group_increase",
                "group_id": 1,
                "user_id": 2
            })),
            Bot::disabled(),
        );
        assert_eq!(event.kind(), EventKind::GroupIncrease);
        assert_eq!(event.conversation_key(), None);
    }

    #[test]
    fn test_clear_reaches_context() {
        let event = Event::from_payload(group_message("x"), Bot::disabled());
        event.clear();
        assert!(event.context().is_cleared());
    }

    #[test]
    fn test_refresh_sees_context_mutation() {
        let event = Event::from_payload(group_message("x"), Bot::disabled());
        event.context().insert("message", "rewritten");
        assert_eq!(event.text(), "x");
        assert_eq!(event.refresh().text(), "rewritten");
    }

    #[tokio::test]
    async fn test_send_targets_group() {
        let outbound = Arc::new(RecordingOutbound::default());
        let event = Event::from_payload(group_message("x"), Bot::new(outbound.clone()));
        event.send("pong").await.unwrap();

        let calls = outbound.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "send_group_msg");
        assert_eq!(calls[0].1["group_id"], json!(200));
    }

    #[tokio::test]
    async fn test_approve_friend_request() {
        let outbound = Arc::new(RecordingOutbound::default());
        let event = Event::from_payload(
            payload(json!({
                "post_type": "request",
                "request_type": "friend",
                "self_id": 1,
                "user_id": 2,
                "flag": "abc"
            })),
            Bot::new(outbound.clone()),
        );
        event.approve(Some("pal")).await.unwrap();

        let calls = outbound.calls();
        assert_eq!(calls[0].0, "set_friend_add_request");
        assert_eq!(calls[0].1["flag"], json!("abc"));
        assert_eq!(calls[0].1["approve"], json!(true));
    }

    #[tokio::test]
    async fn test_approve_rejects_non_request() {
        let event = Event::from_payload(group_message("x"), Bot::disabled());
        assert!(matches!(
            event.approve(None).await,
            Err(ApiError::NotSupported)
        ));
    }
}
