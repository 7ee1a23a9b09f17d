//! # Weave Core
//!
//! The data model of the Weave bot engine.
//!
//! ## Layers
//!
//! ### Foundation
//!
//! - **Context**: the mutable JSON payload of one dispatch ([`Context`])
//! - **Event**: a typed view over a context ([`Event`], [`EventKind`])
//! - **Message**: segment lists ([`Message`], [`Segment`])
//!
//! ### Integration
//!
//! - **Outbound**: the transport-provided sending contract ([`Outbound`])
//! - **Bot**: the handle carried by every event ([`Bot`])
//!
//! ### Conversations
//!
//! Handlers can suspend until the next message of the same conversation
//! through [`Event::defer`], backed by the [`ConversationRegistry`].
//!
//! ```text
//! payload ──▶ Context ──▶ Event ──▶ matcher / handler
//!                ▲          │
//!                └─ clear ──┘        Event::defer ──▶ ConversationRegistry
//! ```

pub mod conversation;
pub mod error;
pub mod foundation;
pub mod integration;

pub use conversation::{ConversationKey, ConversationRegistry, Deferral, Prompt};
pub use error::{ApiError, ApiResult, ConversationError, ConversationResult};
pub use foundation::{
    Context, Event, EventCategory, EventKind, EventKindSet, Message, RawPayload, Segment, Sender,
};
pub use integration::{Bot, BoxedOutbound, DisabledOutbound, Outbound, Target};

/// Prelude for common imports.
pub mod prelude {
    pub use super::conversation::ConversationKey;
    pub use super::error::{ApiError, ApiResult, ConversationError, ConversationResult};
    pub use super::foundation::*;
    pub use super::integration::{Bot, Outbound, Target};
}
