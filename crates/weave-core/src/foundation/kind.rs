//! Event classification.
//!
//! Every inbound payload is classified into exactly one [`EventKind`] by
//! inspecting its discriminating fields:
//!
//! ```text
//! post_type = "message"     ─ message_type    ─▶ PrivateMessage | GroupMessage | Message
//! post_type = "notice"      ─ notice_type     ─▶ GroupUpload | GroupAdmin | … | Notice
//! post_type = "request"     ─ request_type    ─▶ FriendRequest | GroupRequest | Request
//! post_type = "meta_event"  ─ meta_event_type ─▶ Lifecycle | Heartbeat | Meta
//! anything else                               ─▶ Unknown
//! ```
//!
//! Handlers declare the kinds they accept as an [`EventKindSet`]; the
//! dispatcher checks set membership before evaluating any matcher.

use std::fmt;

use serde_json::Value;

use super::context::RawPayload;

// ============================================================================
// Event Category
// ============================================================================

/// High-level category of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// Message events (private messages, group messages, etc.)
    Message,
    /// Notice events (group changes, recalls, friend adds, etc.)
    Notice,
    /// Request events (friend requests, group join requests, etc.)
    Request,
    /// Meta events (lifecycle, heartbeat, etc.)
    Meta,
    /// Other/unknown event types
    Other,
}

// ============================================================================
// Event Kind
// ============================================================================

/// The closed set of event variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    PrivateMessage,
    GroupMessage,
    /// A message with an unrecognised `message_type`.
    Message,

    GroupUpload,
    GroupAdmin,
    GroupDecrease,
    GroupIncrease,
    GroupBan,
    FriendAdd,
    GroupRecall,
    FriendRecall,
    /// A notice with an unrecognised `notice_type`.
    Notice,

    FriendRequest,
    GroupRequest,
    /// A request with an unrecognised `request_type`.
    Request,

    Lifecycle,
    Heartbeat,
    /// A meta event with an unrecognised `meta_event_type`.
    Meta,

    /// A payload whose `post_type` is missing or unrecognised.
    Unknown,
}

impl EventKind {
    /// Every variant, in declaration order.
    pub const ALL: [EventKind; 19] = [
        EventKind::PrivateMessage,
        EventKind::GroupMessage,
        EventKind::Message,
        EventKind::GroupUpload,
        EventKind::GroupAdmin,
        EventKind::GroupDecrease,
        EventKind::GroupIncrease,
        EventKind::GroupBan,
        EventKind::FriendAdd,
        EventKind::GroupRecall,
        EventKind::FriendRecall,
        EventKind::Notice,
        EventKind::FriendRequest,
        EventKind::GroupRequest,
        EventKind::Request,
        EventKind::Lifecycle,
        EventKind::Heartbeat,
        EventKind::Meta,
        EventKind::Unknown,
    ];

    /// Classifies a raw payload.
    pub fn classify(payload: &RawPayload) -> Self {
        let field = |key: &str| payload.get(key).and_then(Value::as_str).unwrap_or("");

        match field("post_type") {
            "message" => match field("message_type") {
                "private" => Self::PrivateMessage,
                "group" => Self::GroupMessage,
                _ => Self::Message,
            },
            "notice" => match field("notice_type") {
                "group_upload" => Self::GroupUpload,
                "group_admin" => Self::GroupAdmin,
                "group_decrease" => Self::GroupDecrease,
                "group_increase" => Self::GroupIncrease,
                "group_ban" => Self::GroupBan,
                "friend_add" => Self::FriendAdd,
                "group_recall" => Self::GroupRecall,
                "friend_recall" => Self::FriendRecall,
                _ => Self::Notice,
            },
            "request" => match field("request_type") {
                "friend" => Self::FriendRequest,
                "group" => Self::GroupRequest,
                _ => Self::Request,
            },
            "meta_event" => match field("meta_event_type") {
                "lifecycle" => Self::Lifecycle,
                "heartbeat" => Self::Heartbeat,
                _ => Self::Meta,
            },
            _ => Self::Unknown,
        }
    }

    /// Returns the category this kind belongs to.
    pub fn category(self) -> EventCategory {
        use EventKind::*;
        match self {
            PrivateMessage | GroupMessage | Message => EventCategory::Message,
            GroupUpload | GroupAdmin | GroupDecrease | GroupIncrease | GroupBan | FriendAdd
            | GroupRecall | FriendRecall | Notice => EventCategory::Notice,
            FriendRequest | GroupRequest | Request => EventCategory::Request,
            Lifecycle | Heartbeat | Meta => EventCategory::Meta,
            Unknown => EventCategory::Other,
        }
    }

    /// Returns a stable, human-readable name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrivateMessage => "private_message",
            Self::GroupMessage => "group_message",
            Self::Message => "message",
            Self::GroupUpload => "group_upload",
            Self::GroupAdmin => "group_admin",
            Self::GroupDecrease => "group_decrease",
            Self::GroupIncrease => "group_increase",
            Self::GroupBan => "group_ban",
            Self::FriendAdd => "friend_add",
            Self::GroupRecall => "group_recall",
            Self::FriendRecall => "friend_recall",
            Self::Notice => "notice",
            Self::FriendRequest => "friend_request",
            Self::GroupRequest => "group_request",
            Self::Request => "request",
            Self::Lifecycle => "lifecycle",
            Self::Heartbeat => "heartbeat",
            Self::Meta => "meta",
            Self::Unknown => "unknown",
        }
    }

    fn bit(self) -> u32 {
        1 << (self as u8)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Event Kind Set
// ============================================================================

/// A set of [`EventKind`]s accepted by a handler.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventKindSet(u32);

impl EventKindSet {
    /// The empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every kind, including [`EventKind::Unknown`].
    pub fn all() -> Self {
        Self::of(&EventKind::ALL)
    }

    /// Builds a set from a slice of kinds.
    pub fn of(kinds: &[EventKind]) -> Self {
        kinds.iter().fold(Self::empty(), |set, kind| set.with(*kind))
    }

    /// All kinds of the given category.
    pub fn category(category: EventCategory) -> Self {
        EventKind::ALL
            .iter()
            .filter(|kind| kind.category() == category)
            .fold(Self::empty(), |set, kind| set.with(*kind))
    }

    /// All message kinds.
    pub fn messages() -> Self {
        Self::category(EventCategory::Message)
    }

    /// All notice kinds.
    pub fn notices() -> Self {
        Self::category(EventCategory::Notice)
    }

    /// All request kinds.
    pub fn requests() -> Self {
        Self::category(EventCategory::Request)
    }

    /// All meta kinds.
    pub fn metas() -> Self {
        Self::category(EventCategory::Meta)
    }

    /// Returns a copy with `kind` added.
    #[must_use]
    pub fn with(self, kind: EventKind) -> Self {
        Self(self.0 | kind.bit())
    }

    /// Returns the union of both sets.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns `true` if `kind` is a member.
    pub fn contains(self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Returns `true` if the set has no members.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates the members in declaration order.
    pub fn iter(self) -> impl Iterator<Item = EventKind> {
        EventKind::ALL.into_iter().filter(move |kind| self.contains(*kind))
    }
}

impl From<EventKind> for EventKindSet {
    fn from(kind: EventKind) -> Self {
        Self::empty().with(kind)
    }
}

impl<const N: usize> From<[EventKind; N]> for EventKindSet {
    fn from(kinds: [EventKind; N]) -> Self {
        Self::of(&kinds)
    }
}

impl From<EventCategory> for EventKindSet {
    fn from(category: EventCategory) -> Self {
        Self::category(category)
    }
}

impl std::ops::BitOr for EventKindSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl std::ops::BitOr<EventKind> for EventKind {
    type Output = EventKindSet;

    fn bitor(self, rhs: EventKind) -> EventKindSet {
        EventKindSet::from(self).with(rhs)
    }
}

impl std::ops::BitOr<EventKind> for EventKindSet {
    type Output = Self;

    fn bitor(self, rhs: EventKind) -> Self {
        self.with(rhs)
    }
}

impl fmt::Debug for EventKindSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classify(value: Value) -> EventKind {
        match value {
            Value::Object(map) => EventKind::classify(&map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_classify_messages() {
        assert_eq!(
            classify(json!({ "post_type": "message", "message_type": "group" })),
            EventKind::GroupMessage
        );
        assert_eq!(
            classify(json!({ "post_type": "message", "message_type": "private" })),
            EventKind::PrivateMessage
        );
        assert_eq!(
            classify(json!({ "post_type": "message", "message_type": "guild" })),
            EventKind::Message
        );
    }

    #[test]
    fn test_classify_other_post_types() {
        assert_eq!(
            classify(json!({ "post_type": "notice", "notice_type": "group_ban" })),
            EventKind::GroupBan
        );
        assert_eq!(
            classify(json!({ "post_type": "request", "request_type": "friend" })),
            EventKind::FriendRequest
        );
        assert_eq!(
            classify(json!({ "post_type": "meta_event", "meta_event_type": "heartbeat" })),
            EventKind::Heartbeat
        );
        assert_eq!(classify(json!({ "echo": 1 })), EventKind::Unknown);
    }

    #[test]
    fn test_kind_set_membership() {
        let set = EventKind::GroupMessage | EventKind::PrivateMessage;
        assert!(set.contains(EventKind::GroupMessage));
        assert!(!set.contains(EventKind::Message));
        assert!(!set.contains(EventKind::FriendAdd));

        let messages = EventKindSet::messages();
        assert_eq!(messages.iter().count(), 3);
        assert!(EventKindSet::all().contains(EventKind::Unknown));
        assert!(EventKindSet::empty().is_empty());
    }

    #[test]
    fn test_category_of_every_kind_is_consistent() {
        let union = EventKindSet::messages()
            | EventKindSet::notices()
            | EventKindSet::requests()
            | EventKindSet::metas()
            | EventKindSet::category(EventCategory::Other);
        assert_eq!(union, EventKindSet::all());
    }
}
