//! Handlers and handler entries.
//!
//! A handler is any async function taking an [`Event`] and returning either
//! `()` or `Result<(), E>` with `E: Into<BoxError>`:
//!
//! ```rust,ignore
//! async fn echo(event: Event) -> Result<(), BoxError> {
//!     event.send(event.text()).await?;
//!     Ok(())
//! }
//!
//! let entry = on_message().matcher(command(["/echo"])).handler(echo);
//! ```
//!
//! Every handler is type-erased into a [`BoxedHandlerService`], a tower
//! service from `Event` to `()`, and stored in a [`HandlerEntry`] together
//! with the set of event kinds it accepts and its [`Matcher`].
//!
//! # Selection
//!
//! Handlers are not prioritised. The dispatcher walks entries in
//! registration order and invokes the first one whose accepted kinds contain
//! the event's kind *and* whose matcher holds. Two entries with overlapping
//! matchers for the same kind therefore shadow each other: only the one
//! registered first ever runs.

use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tower::Service;
use tower::util::BoxCloneSyncService;
use weave_core::{Event, EventKind, EventKindSet};

use crate::error::BoxError;
use crate::matcher::Matcher;

/// A type-erased, cloneable handler service.
pub type BoxedHandlerService = BoxCloneSyncService<Event, (), BoxError>;

// ============================================================================
// Return values
// ============================================================================

/// Return types accepted from handler, middleware and init functions.
pub trait IntoHandlerResult: Send {
    fn into_handler_result(self) -> Result<(), BoxError>;
}

impl IntoHandlerResult for () {
    fn into_handler_result(self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<E> IntoHandlerResult for Result<(), E>
where
    E: Into<BoxError> + Send,
{
    fn into_handler_result(self) -> Result<(), BoxError> {
        self.map_err(Into::into)
    }
}

// ============================================================================
// Handler trait
// ============================================================================

/// An async event handler.
///
/// Implemented for every `Fn(Event) -> impl Future<Output = R>` where `R`
/// implements [`IntoHandlerResult`].
pub trait Handler: Clone + Send + Sync + 'static {
    fn call(&self, event: Event) -> BoxFuture<'static, Result<(), BoxError>>;
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Event) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoHandlerResult + 'static,
{
    fn call(&self, event: Event) -> BoxFuture<'static, Result<(), BoxError>> {
        let fut = (self)(event);
        Box::pin(async move { fut.await.into_handler_result() })
    }
}

/// A tower [`Service`] that calls a single handler.
pub struct HandlerService<H> {
    handler: H,
}

impl<H: Clone> Clone for HandlerService<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<H: Handler> HandlerService<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }
}

impl<H: Handler> Service<Event> for HandlerService<H> {
    type Response = ();
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<(), BoxError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: Event) -> Self::Future {
        self.handler.call(event)
    }
}

// ============================================================================
// HandlerEntry
// ============================================================================

/// A registered handler: accepted kinds, matcher and service.
#[derive(Clone)]
pub struct HandlerEntry {
    name: Arc<str>,
    accepts: EventKindSet,
    matcher: Matcher,
    service: BoxedHandlerService,
}

impl HandlerEntry {
    /// Builds an entry from an already-erased service.
    ///
    /// Lets callers stack tower layers (timeouts, concurrency limits) on a
    /// handler before registering it.
    pub fn from_service(
        name: impl Into<Arc<str>>,
        accepts: EventKindSet,
        matcher: Matcher,
        service: BoxedHandlerService,
    ) -> Self {
        Self {
            name: name.into(),
            accepts,
            matcher,
            service,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The set of event kinds this handler accepts.
    pub fn accepted_kinds(&self) -> EventKindSet {
        self.accepts
    }

    /// Returns `true` if events of `kind` may reach this handler.
    pub fn accepts(&self, kind: EventKind) -> bool {
        self.accepts.contains(kind)
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn service(&self) -> &BoxedHandlerService {
        &self.service
    }
}

impl std::fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("name", &self.name)
            .field("accepts", &self.accepts)
            .field("matcher", &self.matcher)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Builder returned by [`on`] and friends.
#[derive(Debug, Clone)]
#[must_use = "call `.handler(f)` to build the entry"]
pub struct HandlerBuilder {
    name: Option<String>,
    accepts: EventKindSet,
    matcher: Matcher,
}

impl HandlerBuilder {
    /// Sets the name used in logs (defaults to the handler's type name).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a matcher; several calls are combined with AND.
    pub fn matcher(mut self, matcher: Matcher) -> Self {
        self.matcher = self.matcher.and(matcher);
        self
    }

    /// Finishes the entry with `handler`.
    pub fn handler<H: Handler>(self, handler: H) -> HandlerEntry {
        let name = self
            .name
            .unwrap_or_else(|| short_type_name::<H>().to_string());
        HandlerEntry::from_service(
            name,
            self.accepts,
            self.matcher,
            BoxCloneSyncService::new(HandlerService::new(handler)),
        )
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Handles events whose kind is in `kinds`.
pub fn on(kinds: impl Into<EventKindSet>) -> HandlerBuilder {
    HandlerBuilder {
        name: None,
        accepts: kinds.into(),
        matcher: Matcher::always(),
    }
}

/// Handles every message event.
pub fn on_message() -> HandlerBuilder {
    on(EventKindSet::messages())
}

/// Handles every notice event.
pub fn on_notice() -> HandlerBuilder {
    on(EventKindSet::notices())
}

/// Handles every request event.
pub fn on_request() -> HandlerBuilder {
    on(EventKindSet::requests())
}

/// Handles every meta event.
pub fn on_meta() -> HandlerBuilder {
    on(EventKindSet::metas())
}

/// Handles every event, including unclassified ones.
pub fn on_any() -> HandlerBuilder {
    on(EventKindSet::all())
}
