//! The mutable dispatch context.
//!
//! One [`Context`] is created per inbound payload and shared as
//! `Arc<Context>` between the middleware pipeline, the [`Event`] built from
//! it and the dispatcher. It is destroyed when dispatch for that payload
//! completes.
//!
//! # Concurrency
//!
//! Priority-0 middleware run concurrently against the same context. Every
//! individual read or write is atomic, but the framework does not order
//! writes from sibling entries: tier-0 middleware must touch disjoint keys.
//!
//! [`Event`]: crate::Event

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde_json::{Map, Value};

/// An inbound payload as received from the transport.
pub type RawPayload = Map<String, Value>;

/// Mutable wrapper around a [`RawPayload`] plus a cleared flag.
///
/// Clearing the context terminates processing of the event: no later
/// middleware stage runs and no handler is selected.
pub struct Context {
    data: RwLock<RawPayload>,
    cleared: AtomicBool,
}

impl Context {
    /// Wraps a payload.
    pub fn new(payload: RawPayload) -> Self {
        Self {
            data: RwLock::new(payload),
            cleared: AtomicBool::new(false),
        }
    }

    /// Returns a clone of the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.read().get(key).cloned()
    }

    /// Returns `true` if `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    /// Stores `value` under `key`, returning the previous value.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.data.write().insert(key.into(), value.into())
    }

    /// Removes `key`, returning its value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.data.write().remove(key)
    }

    /// Runs `f` with shared access to the payload.
    pub fn read<R>(&self, f: impl FnOnce(&RawPayload) -> R) -> R {
        f(&self.data.read())
    }

    /// Runs `f` with exclusive access to the payload.
    ///
    /// Use this when several keys must change together.
    pub fn update<R>(&self, f: impl FnOnce(&mut RawPayload) -> R) -> R {
        f(&mut self.data.write())
    }

    /// Returns a copy of the current payload.
    pub fn snapshot(&self) -> RawPayload {
        self.data.read().clone()
    }

    /// Marks the context cleared; dispatch of this event stops.
    pub fn clear(&self) {
        self.cleared.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`clear`](Self::clear) has been called.
    pub fn is_cleared(&self) -> bool {
        self.cleared.load(Ordering::SeqCst)
    }
}

impl From<RawPayload> for Context {
    fn from(payload: RawPayload) -> Self {
        Self::new(payload)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("keys", &self.data.read().len())
            .field("cleared", &self.is_cleared())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> RawPayload {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test payloads are objects"),
        }
    }

    #[test]
    fn test_insert_and_read_back() {
        let ctx = Context::new(payload(json!({ "post_type": "message" })));
        assert_eq!(ctx.insert("x", 1), None);
        assert_eq!(ctx.get("x"), Some(json!(1)));
        assert!(ctx.contains_key("post_type"));
        assert_eq!(ctx.remove("x"), Some(json!(1)));
        assert!(!ctx.contains_key("x"));
    }

    #[test]
    fn test_update_is_applied_atomically() {
        let ctx = Context::new(RawPayload::new());
        ctx.update(|map| {
            map.insert("a".into(), json!(1));
            map.insert("b".into(), json!(2));
        });
        assert_eq!(ctx.read(|map| map.len()), 2);
        assert_eq!(ctx.snapshot().get("b"), Some(&json!(2)));
    }

    #[test]
    fn test_clear_flag() {
        let ctx = Context::new(RawPayload::new());
        assert!(!ctx.is_cleared());
        ctx.clear();
        assert!(ctx.is_cleared());
    }
}
