//! Event dispatcher.
//!
//! The [`Dispatcher`] takes one decoded payload at a time through the
//! following state machine:
//!
//! ```text
//! RECEIVED ─┬─ no post_type ───────────────────────────▶ Response
//!           └─ CONVERSATION_CHECK ─┬─ pending deferral ─▶ Resumed
//!                                  └─ MIDDLEWARE ─┬─ cleared ──────▶ Cleared
//!                                                 └─ HANDLER_MATCH ─┬─ none ─▶ Unmatched
//!                                                                   └─ first ─▶ Invoked
//! ```
//!
//! # Routing precedence
//!
//! A follow-up event for a conversation with a pending deferral goes to the
//! waiting handler only; it never reaches middleware or handler selection.
//!
//! # Selection
//!
//! Handlers of enabled plugins are walked in registration order. For each
//! entry the event kind is checked against the accepted kinds first, then
//! the matcher is evaluated. The first entry passing both is invoked and the
//! walk stops. A matcher that fails or panics counts as not matching.
//!
//! # Concurrency
//!
//! [`deliver`](Dispatcher::deliver) returns once the middleware phase is over
//! and a handler has been *spawned*. Handlers run on a [`TaskTracker`], so a
//! handler suspended in a deferral never blocks the next delivery.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;
use tracing::{Instrument, debug, debug_span, error, info, trace, warn};
use weave_core::{Bot, ConversationError, Context, Event, EventKind, RawPayload};

use crate::error::{HandlerError, MatcherError, Panicked};
use crate::middleware::Pipeline;
use crate::registry::{ActiveHandler, PluginRegistry};

/// Width of the per-message log line.
const LOG_LINE_WIDTH: usize = 79;

/// What happened to one delivered payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The payload was an API response and went to the outbound.
    Response,
    /// The event resumed a handler waiting in a deferral.
    Resumed,
    /// Middleware cleared the context; no handler was selected.
    Cleared,
    /// No handler matched; the event was dropped.
    Unmatched,
    /// A handler was spawned.
    Invoked { plugin: String, handler: String },
}

/// Routes inbound payloads through conversations, middleware and handlers.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<PluginRegistry>,
    bot: Bot,
    tracker: TaskTracker,
}

impl Dispatcher {
    pub fn new(registry: Arc<PluginRegistry>, bot: Bot) -> Self {
        Self {
            registry,
            bot,
            tracker: TaskTracker::new(),
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Number of handler invocations still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Dispatches one inbound payload.
    pub async fn deliver(&self, payload: RawPayload) -> DispatchOutcome {
        if !payload.contains_key("post_type") {
            let consumed = self.bot.route_response(&payload);
            trace!(consumed, "Inbound API response");
            return DispatchOutcome::Response;
        }

        let ctx = Arc::new(Context::new(payload));
        let event = Event::new(Arc::clone(&ctx), self.bot.clone());
        let span = debug_span!("dispatch", kind = %event.kind());

        self.dispatch(ctx, event).instrument(span).await
    }

    async fn dispatch(&self, ctx: Arc<Context>, event: Event) -> DispatchOutcome {
        let event = match self.bot.conversations().try_fulfill(event) {
            Ok(()) => return DispatchOutcome::Resumed,
            Err(event) => event,
        };

        if let Some(line) = describe(&event) {
            info!("{line}");
        }

        // Both snapshots are taken before any middleware runs, so a toggle
        // made during this dispatch only affects the next one.
        let pipeline = Pipeline::new(self.registry.active_middleware());
        let handlers = self.registry.active_handlers();

        let ctx = pipeline.run(ctx).await;
        if ctx.is_cleared() {
            debug!("Context cleared by middleware");
            return DispatchOutcome::Cleared;
        }

        let event = event.refresh();
        for active in handlers {
            if !active.entry.accepts(event.kind()) {
                continue;
            }
            match active.entry.matcher().evaluate(&event) {
                Ok(true) => return self.invoke(active, event),
                Ok(false) => {}
                Err(error) => {
                    let err = MatcherError {
                        plugin: active.plugin.to_string(),
                        handler: active.entry.name().to_string(),
                        error,
                    };
                    warn!(
                        plugin = %active.plugin,
                        handler = %active.entry.name(),
                        error = %err,
                        "Matcher failed, treating as no match"
                    );
                }
            }
        }

        trace!("No handler matched");
        DispatchOutcome::Unmatched
    }

    fn invoke(&self, active: ActiveHandler, event: Event) -> DispatchOutcome {
        let ActiveHandler { plugin, entry } = active;
        let handler: Arc<str> = Arc::from(entry.name());
        debug!(plugin = %plugin, handler = %handler, "Invoking handler");

        let outcome = DispatchOutcome::Invoked {
            plugin: plugin.to_string(),
            handler: handler.to_string(),
        };

        let service = entry.service().clone();
        let span = debug_span!("handler", plugin = %plugin, handler = %handler);
        self.tracker.spawn(
            async move {
                let result = AssertUnwindSafe(service.oneshot(event)).catch_unwind().await;
                let error = match result {
                    Ok(Ok(())) => {
                        trace!("Handler finished");
                        return;
                    }
                    Ok(Err(error)) => error,
                    Err(payload) => Panicked::from_payload(payload).into(),
                };

                if error
                    .downcast_ref::<ConversationError>()
                    .is_some_and(ConversationError::is_cancelled)
                {
                    debug!("Handler cancelled while waiting for a follow-up");
                    return;
                }

                let err = HandlerError {
                    plugin: plugin.to_string(),
                    handler: handler.to_string(),
                    error,
                };
                error!(error = %err, "Handler failed");
            }
            .instrument(span),
        );

        outcome
    }

    /// Stops accepting work and waits up to `grace` for running handlers.
    ///
    /// Pending deferrals are cancelled first, so suspended handlers wake up
    /// with [`ConversationError::Cancelled`]. Returns `true` if every handler
    /// finished in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.bot.conversations().shutdown();
        self.tracker.close();

        let in_flight = self.tracker.len();
        if in_flight > 0 {
            info!(in_flight, "Waiting for running handlers");
        }

        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    remaining = self.tracker.len(),
                    grace_ms = grace.as_millis() as u64,
                    "Handlers still running after grace period"
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("in_flight", &self.tracker.len())
            .finish_non_exhaustive()
    }
}

// ─── Message log line ────────────────────────────────────────────────────────

fn describe(event: &Event) -> Option<String> {
    let label = match event.kind() {
        EventKind::GroupMessage => "GroupMessage",
        EventKind::PrivateMessage => "PrivateMessage",
        EventKind::Message => "Message",
        _ => return None,
    };

    let sender = event
        .sender()
        .and_then(|s| s.nickname)
        .unwrap_or_default();
    let user_id = event.user_id().unwrap_or_default();
    let group = event
        .group_id()
        .map(|id| format!("[Group={id}]"))
        .unwrap_or_default();

    let line = format!(
        "[{label}]{group}[Sender={sender}({user_id})]: {}",
        event.text()
    );
    Some(shorten(&line, LOG_LINE_WIDTH))
}

/// Collapses whitespace and truncates to `width` characters with `...`.
fn shorten(text: &str, width: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= width {
        return collapsed;
    }
    let keep = width.saturating_sub(3);
    let mut out: String = collapsed.chars().take(keep).collect();
    out.truncate(out.trim_end().len());
    out.push_str("...");
    out
}
