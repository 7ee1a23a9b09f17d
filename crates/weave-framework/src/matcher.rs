//! Matcher algebra.
//!
//! A [`Matcher`] is a side-effect-free predicate over an [`Event`]. Matchers
//! compose into an expression tree:
//!
//! ```text
//! LEAF(predicate) | AND(left, right) | OR(left, right) | NOT(operand)
//! ```
//!
//! Evaluation is structural recursion, left to right, with short-circuit
//! rules: `AND` evaluates its right side only if the left is `true`, `OR`
//! only if the left is `false`. A leaf that returns an error or panics makes
//! the whole evaluation fail; the dispatcher then treats the handler as
//! non-matching.
//!
//! # Example
//!
//! ```rust,ignore
//! use weave_framework::matcher::Matcher;
//! use weave_framework::matcher_builders::{command, in_groups, role_is};
//!
//! let admin_only = command(["/ban"]) & in_groups([100, 200]) & role_is("admin");
//! let not_admin = !role_is("admin");
//! ```

use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use weave_core::Event;

use crate::error::{BoxError, Panicked};

/// A type-erased, fallible predicate.
pub type CheckFn = Arc<dyn Fn(&Event) -> Result<bool, BoxError> + Send + Sync>;

enum Node {
    Const(bool),
    Leaf(CheckFn),
    And(Matcher, Matcher),
    Or(Matcher, Matcher),
    Not(Matcher),
}

/// An immutable predicate tree.
///
/// Cloning is cheap: the tree is shared behind an `Arc`, so composing an
/// existing matcher into several trees never copies it.
#[derive(Clone)]
pub struct Matcher {
    node: Arc<Node>,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::always()
    }
}

impl Matcher {
    fn from_node(node: Node) -> Self {
        Self {
            node: Arc::new(node),
        }
    }

    /// Wraps an infallible predicate.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        Self::from_node(Node::Leaf(Arc::new(move |event| Ok(f(event)))))
    }

    /// Wraps a fallible predicate. An `Err` makes evaluation fail.
    pub fn try_new<F, E>(f: F) -> Self
    where
        F: Fn(&Event) -> Result<bool, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::from_node(Node::Leaf(Arc::new(move |event| f(event).map_err(Into::into))))
    }

    /// Matches every event.
    pub fn always() -> Self {
        Self::from_node(Node::Const(true))
    }

    /// Matches no event.
    pub fn never() -> Self {
        Self::from_node(Node::Const(false))
    }

    /// `self AND other`.
    #[must_use]
    pub fn and(self, other: Matcher) -> Self {
        Self::from_node(Node::And(self, other))
    }

    /// `self OR other`.
    #[must_use]
    pub fn or(self, other: Matcher) -> Self {
        Self::from_node(Node::Or(self, other))
    }

    /// `NOT self`.
    #[must_use]
    pub fn invert(self) -> Self {
        Self::from_node(Node::Not(self))
    }

    /// Evaluates the tree against `event`.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a leaf that was evaluated. A leaf
    /// panic is caught and returned as [`Panicked`].
    pub fn evaluate(&self, event: &Event) -> Result<bool, BoxError> {
        match &*self.node {
            Node::Const(value) => Ok(*value),
            Node::Leaf(check) => match catch_unwind(AssertUnwindSafe(|| check(event))) {
                Ok(result) => result,
                Err(payload) => Err(Panicked::from_payload(payload).into()),
            },
            Node::And(left, right) => {
                if !left.evaluate(event)? {
                    return Ok(false);
                }
                right.evaluate(event)
            }
            Node::Or(left, right) => {
                if left.evaluate(event)? {
                    return Ok(true);
                }
                right.evaluate(event)
            }
            Node::Not(operand) => Ok(!operand.evaluate(event)?),
        }
    }

    /// Like [`evaluate`](Self::evaluate), treating failure as "no match".
    pub fn matches(&self, event: &Event) -> bool {
        self.evaluate(event).unwrap_or(false)
    }
}

impl BitAnd for Matcher {
    type Output = Matcher;

    fn bitand(self, rhs: Matcher) -> Matcher {
        self.and(rhs)
    }
}

impl BitOr for Matcher {
    type Output = Matcher;

    fn bitor(self, rhs: Matcher) -> Matcher {
        self.or(rhs)
    }
}

impl Not for Matcher {
    type Output = Matcher;

    fn not(self) -> Matcher {
        self.invert()
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.node {
            Node::Const(true) => f.write_str("Always"),
            Node::Const(false) => f.write_str("Never"),
            Node::Leaf(_) => f.write_str("Leaf"),
            Node::And(l, r) => f.debug_tuple("And").field(l).field(r).finish(),
            Node::Or(l, r) => f.debug_tuple("Or").field(l).field(r).finish(),
            Node::Not(m) => f.debug_tuple("Not").field(m).finish(),
        }
    }
}
