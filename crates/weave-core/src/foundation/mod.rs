//! Foundation layer - the event model.
//!
//! - [`context`]: the mutable payload shared by one dispatch
//! - [`kind`]: classification of payloads into event kinds
//! - [`event`]: the typed, read-only view handed to matchers and handlers
//! - [`message`]: message segments

pub mod context;
pub mod event;
pub mod kind;
pub mod message;

pub use context::{Context, RawPayload};
pub use event::{Event, Sender};
pub use kind::{EventCategory, EventKind, EventKindSet};
pub use message::{Message, Segment};
