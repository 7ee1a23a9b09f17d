//! Multi-turn conversations.
//!
//! A handler may suspend itself until the next event of the same
//! conversation arrives. The [`ConversationRegistry`] keeps one pending slot
//! per [`ConversationKey`]; the dispatcher offers every inbound event to
//! [`try_fulfill`](ConversationRegistry::try_fulfill) *before* running
//! middleware, so a follow-up is consumed by the waiting handler only.
//!
//! # Lifecycle of a slot
//!
//! ```text
//! register() ──► pending ──► fulfilled   (matching event arrives → Some(event))
//!                        ──► expired     (deadline elapses       → None)
//!                        ──► cancelled   (shutdown / guard drop  → Cancelled)
//! ```
//!
//! Every outcome removes the slot. Slots carry a generation id so a stale
//! [`Deferral`] guard never removes a newer request for the same key.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{ApiResult, ConversationError, ConversationResult};
use crate::foundation::event::Event;

/// A prompt to deliver once the slot is reserved.
pub type Prompt<'a> = BoxFuture<'a, ApiResult<()>>;

// =============================================================================
// ConversationKey
// =============================================================================

/// Identity of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationKey {
    /// One member talking inside a group.
    Group { group_id: i64, user_id: i64 },
    /// A one-to-one chat.
    User { user_id: i64 },
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group { group_id, user_id } => write!(f, "group:{group_id}/user:{user_id}"),
            Self::User { user_id } => write!(f, "user:{user_id}"),
        }
    }
}

// =============================================================================
// ConversationRegistry
// =============================================================================

struct Pending {
    id: u64,
    tx: oneshot::Sender<Event>,
    deadline: Option<Instant>,
}

impl Pending {
    fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }
}

/// Outstanding deferral requests, keyed by conversation.
pub struct ConversationRegistry {
    pending: Mutex<HashMap<ConversationKey, Pending>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
    limit: Option<usize>,
}

impl Default for ConversationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationRegistry {
    /// Creates an unbounded registry.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
            limit: None,
        }
    }

    /// Bounds the number of concurrently pending conversations.
    #[must_use]
    pub fn with_capacity_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Number of pending conversations.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Returns `true` if `key` has a pending request.
    pub fn is_pending(&self, key: &ConversationKey) -> bool {
        self.pending.lock().contains_key(key)
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Reserves the slot for `key`.
    ///
    /// The returned guard releases the slot when dropped, so cancelling the
    /// task that holds it never leaks an entry.
    ///
    /// # Errors
    ///
    /// - [`ConversationError::Conflict`] if `key` already has a live request.
    /// - [`ConversationError::Saturated`] if the capacity limit is reached.
    /// - [`ConversationError::Cancelled`] after shutdown.
    pub fn register(
        self: &Arc<Self>,
        key: ConversationKey,
        timeout: Option<Duration>,
    ) -> ConversationResult<Deferral> {
        if self.is_shut_down() {
            return Err(ConversationError::Cancelled);
        }

        let now = Instant::now();
        let mut pending = self.pending.lock();

        if let Some(existing) = pending.get(&key) {
            if !existing.is_expired(now) && !existing.tx.is_closed() {
                return Err(ConversationError::Conflict(key));
            }
            trace!(conversation = %key, "Replacing stale deferral");
            pending.remove(&key);
        }

        if let Some(limit) = self.limit
            && pending.len() >= limit
        {
            return Err(ConversationError::Saturated { limit });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = timeout.map(|timeout| now + timeout);
        let (tx, rx) = oneshot::channel();
        pending.insert(key, Pending { id, tx, deadline });

        debug!(conversation = %key, timeout = ?timeout, "Deferral registered");

        Ok(Deferral {
            registry: Arc::clone(self),
            key,
            id,
            deadline,
            rx,
        })
    }

    /// Registers, sends `prompt`, then waits for the follow-up event.
    ///
    /// Resolves to `Ok(None)` when `timeout` elapses. If the prompt fails the
    /// slot is released before the error is returned.
    pub async fn defer(
        self: &Arc<Self>,
        key: ConversationKey,
        prompt: Option<Prompt<'_>>,
        timeout: Option<Duration>,
    ) -> ConversationResult<Option<Event>> {
        let deferral = self.register(key, timeout)?;
        if let Some(prompt) = prompt {
            prompt.await?;
        }
        deferral.wait().await
    }

    /// Hands `event` to the request pending on its conversation.
    ///
    /// Returns the event back when nobody is waiting for it (no key, no
    /// request, request expired, or the waiter went away), in which case the
    /// caller dispatches it normally.
    pub fn try_fulfill(&self, event: Event) -> Result<(), Event> {
        let Some(key) = event.conversation_key() else {
            return Err(event);
        };

        let pending = {
            let mut pending = self.pending.lock();
            match pending.get(&key) {
                Some(entry) if entry.is_expired(Instant::now()) => {
                    pending.remove(&key);
                    None
                }
                Some(_) => pending.remove(&key),
                None => None,
            }
        };

        let Some(entry) = pending else {
            return Err(event);
        };

        match entry.tx.send(event) {
            Ok(()) => {
                debug!(conversation = %key, "Deferral fulfilled");
                Ok(())
            }
            Err(event) => {
                trace!(conversation = %key, "Waiter gone, dispatching normally");
                Err(event)
            }
        }
    }

    /// Cancels every outstanding deferral and rejects new ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "Cancelling pending deferrals");
        }
    }

    fn release(&self, key: &ConversationKey, id: u64) {
        let mut pending = self.pending.lock();
        if pending.get(key).is_some_and(|entry| entry.id == id) {
            pending.remove(key);
            trace!(conversation = %key, "Deferral slot released");
        }
    }
}

impl fmt::Debug for ConversationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationRegistry")
            .field("pending", &self.len())
            .field("limit", &self.limit)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

// =============================================================================
// Deferral
// =============================================================================

/// A reserved conversation slot.
///
/// Dropping the guard releases the slot.
#[must_use = "a deferral releases its slot when dropped"]
pub struct Deferral {
    registry: Arc<ConversationRegistry>,
    key: ConversationKey,
    id: u64,
    deadline: Option<Instant>,
    rx: oneshot::Receiver<Event>,
}

impl Deferral {
    /// The conversation this slot belongs to.
    pub fn key(&self) -> ConversationKey {
        self.key
    }

    /// Suspends until the follow-up event, the deadline, or cancellation.
    ///
    /// # Errors
    ///
    /// [`ConversationError::Cancelled`] on shutdown.
    pub async fn wait(mut self) -> ConversationResult<Option<Event>> {
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        let shutdown = self.registry.shutdown.clone();

        tokio::select! {
            biased;
            received = &mut self.rx => match received {
                Ok(event) => Ok(Some(event)),
                Err(_) => Err(ConversationError::Cancelled),
            },
            () = shutdown.cancelled() => Err(ConversationError::Cancelled),
            () = expired => {
                debug!(conversation = %self.key, "Deferral timed out");
                Ok(None)
            }
        }
    }
}

impl Drop for Deferral {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.id);
    }
}

impl fmt::Debug for Deferral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferral")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::context::RawPayload;
    use crate::integration::bot::Bot;
    use serde_json::{Value, json};

    const KEY: ConversationKey = ConversationKey::Group {
        group_id: 1,
        user_id: 2,
    };

    fn follow_up(bot: &Bot, text: &str) -> Event {
        let payload: RawPayload = match json!({
            "post_type": "message",
            "message_type": "group",
            "group_id": 1,
            "user_id": 2,
            "message": text
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        Event::from_payload(payload, bot.clone())
    }

    #[tokio::test]
    async fn test_second_register_conflicts() {
        let registry = Arc::new(ConversationRegistry::new());
        let first = registry.register(KEY, None).unwrap();
        let second = registry.register(KEY, None);
        assert!(matches!(second, Err(ConversationError::Conflict(k)) if k == KEY));

        // A different conversation is unaffected.
        let other = registry.register(ConversationKey::User { user_id: 2 }, None);
        assert!(other.is_ok());
        drop(first);
    }

    #[tokio::test]
    async fn test_fulfilled_deferral_returns_event_and_frees_slot() {
        let bot = Bot::disabled();
        let registry = Arc::clone(bot.conversations());

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.defer(KEY, None, None).await })
        };
        while !registry.is_pending(&KEY) {
            tokio::task::yield_now().await;
        }

        assert!(registry.try_fulfill(follow_up(&bot, "42")).is_ok());
        let resumed = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(resumed.text(), "42");
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_none_and_frees_slot() {
        let registry = Arc::new(ConversationRegistry::new());
        let result = registry
            .defer(KEY, None, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_event_is_returned() {
        let bot = Bot::disabled();
        let registry = bot.conversations();
        let event = follow_up(&bot, "nobody waits");
        assert!(registry.try_fulfill(event).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_slot_does_not_swallow_event() {
        let bot = Bot::disabled();
        let registry = Arc::clone(bot.conversations());
        let deferral = registry
            .register(KEY, Some(Duration::from_millis(10)))
            .unwrap();
        tokio::time::advance(Duration::from_millis(20)).await;

        assert!(registry.try_fulfill(follow_up(&bot, "late")).is_err());
        assert!(registry.is_empty());
        drop(deferral);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_waiters() {
        let registry = Arc::new(ConversationRegistry::new());
        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.defer(KEY, None, None).await })
        };
        while !registry.is_pending(&KEY) {
            tokio::task::yield_now().await;
        }

        registry.shutdown();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(ConversationError::Cancelled)));
        assert!(registry.is_empty());
        assert!(matches!(
            registry.register(KEY, None),
            Err(ConversationError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_aborted_handler_releases_slot() {
        let registry = Arc::new(ConversationRegistry::new());
        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.defer(KEY, None, None).await })
        };
        while !registry.is_pending(&KEY) {
            tokio::task::yield_now().await;
        }

        waiter.abort();
        let _ = waiter.await;
        assert!(!registry.is_pending(&KEY));
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let registry = Arc::new(ConversationRegistry::new().with_capacity_limit(1));
        let _held = registry.register(KEY, None).unwrap();
        let result = registry.register(ConversationKey::User { user_id: 7 }, None);
        assert!(matches!(result, Err(ConversationError::Saturated { limit: 1 })));
    }

    #[tokio::test]
    async fn test_failed_prompt_releases_slot() {
        let registry = Arc::new(ConversationRegistry::new());
        let prompt: Prompt<'_> =
            Box::pin(async { Err(crate::error::ApiError::NotConnected) });
        let result = registry.defer(KEY, Some(prompt), None).await;
        assert!(matches!(result, Err(ConversationError::Prompt(_))));
        assert!(registry.is_empty());
    }
}
