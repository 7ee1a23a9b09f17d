//! Priority-staged middleware.
//!
//! Middleware runs on every inbound event before handler selection. Entries
//! are grouped by priority into stages, executed in ascending order:
//!
//! ```text
//! … -2, -1  ──▶  0 (parallel tier)  ──▶  1, 2, …
//!  sequential     all at once             sequential
//! ```
//!
//! Entries of every nonzero stage run strictly one after another, so a later
//! stage sees the mutations of earlier ones. All priority-0 entries, across
//! every plugin, run concurrently on the same [`Context`]; they have no
//! relative order. Tier-0 entries that write the same keys race with each
//! other, and avoiding that is up to the caller.
//!
//! After each entry finishes the pipeline checks [`Context::is_cleared`]; a
//! cleared context stops the pipeline at once and no handler is selected.
//! A failing or panicking entry is logged and skipped; it never aborts its
//! siblings or later stages.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tracing::{error, trace};
use weave_core::Context;

use crate::error::{BoxError, MiddlewareError, Panicked};
use crate::handler::IntoHandlerResult;

type MiddlewareFn = Arc<dyn Fn(Arc<Context>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// The priority of the parallel tier.
pub const PARALLEL_TIER: i32 = 0;

// ============================================================================
// Middleware
// ============================================================================

/// One middleware action with its priority.
#[derive(Clone)]
pub struct Middleware {
    priority: i32,
    action: MiddlewareFn,
}

impl Middleware {
    /// An async middleware.
    ///
    /// ```rust,ignore
    /// Middleware::new(1, |ctx: Arc<Context>| async move {
    ///     if ctx.get("user_id") == Some(json!(10001)) {
    ///         ctx.clear();
    ///     }
    /// })
    /// ```
    pub fn new<F, Fut, R>(priority: i32, f: F) -> Self
    where
        F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoHandlerResult + 'static,
    {
        Self {
            priority,
            action: Arc::new(move |ctx| {
                let fut = f(ctx);
                Box::pin(async move { fut.await.into_handler_result() })
            }),
        }
    }

    /// A synchronous middleware, run on the blocking thread pool.
    pub fn blocking<F, R>(priority: i32, f: F) -> Self
    where
        F: Fn(&Context) -> R + Send + Sync + 'static,
        R: IntoHandlerResult + 'static,
    {
        let f = Arc::new(f);
        Self {
            priority,
            action: Arc::new(move |ctx| {
                let f = Arc::clone(&f);
                Box::pin(async move {
                    tokio::task::spawn_blocking(move || f(&ctx).into_handler_result()).await?
                })
            }),
        }
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    async fn run(&self, ctx: Arc<Context>) -> Result<(), BoxError> {
        match AssertUnwindSafe((self.action)(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(Panicked::from_payload(payload).into()),
        }
    }
}

impl std::fmt::Debug for Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Middleware")
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// A middleware together with the plugin that owns it.
#[derive(Debug, Clone)]
pub struct ActiveMiddleware {
    pub plugin: Arc<str>,
    pub middleware: Middleware,
}

impl ActiveMiddleware {
    async fn run(&self, ctx: Arc<Context>) {
        if let Err(error) = self.middleware.run(ctx).await {
            let err = MiddlewareError {
                plugin: self.plugin.to_string(),
                priority: self.middleware.priority(),
                error,
            };
            error!(
                plugin = %self.plugin,
                priority = self.middleware.priority(),
                error = %err,
                "Middleware failed"
            );
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Middleware grouped into priority stages.
#[derive(Debug, Default)]
pub struct Pipeline {
    stages: BTreeMap<i32, Vec<ActiveMiddleware>>,
}

impl Pipeline {
    /// Groups `entries` by priority, keeping their relative order per stage.
    pub fn new(entries: impl IntoIterator<Item = ActiveMiddleware>) -> Self {
        let mut stages: BTreeMap<i32, Vec<ActiveMiddleware>> = BTreeMap::new();
        for entry in entries {
            stages
                .entry(entry.middleware.priority())
                .or_default()
                .push(entry);
        }
        Self { stages }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage priorities in execution order.
    pub fn priorities(&self) -> impl Iterator<Item = i32> + '_ {
        self.stages.keys().copied()
    }

    /// Runs every stage against `ctx` and returns it.
    ///
    /// Returns early, with the context cleared, as soon as an entry clears it.
    pub async fn run(&self, ctx: Arc<Context>) -> Arc<Context> {
        for (&priority, entries) in &self.stages {
            trace!(priority, entries = entries.len(), "Running middleware stage");

            let stopped = if priority == PARALLEL_TIER {
                Self::run_parallel(entries, &ctx).await
            } else {
                Self::run_sequential(entries, &ctx).await
            };

            if stopped {
                trace!(priority, "Context cleared, stopping pipeline");
                break;
            }
        }
        ctx
    }

    async fn run_sequential(entries: &[ActiveMiddleware], ctx: &Arc<Context>) -> bool {
        for entry in entries {
            entry.run(Arc::clone(ctx)).await;
            if ctx.is_cleared() {
                return true;
            }
        }
        false
    }

    async fn run_parallel(entries: &[ActiveMiddleware], ctx: &Arc<Context>) -> bool {
        let mut running: FuturesUnordered<_> = entries
            .iter()
            .map(|entry| entry.run(Arc::clone(ctx)))
            .collect();

        while running.next().await.is_some() {
            if ctx.is_cleared() {
                // Dropping `running` cancels the remaining tier-0 entries.
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;
    use weave_core::RawPayload;

    fn active(plugin: &str, middleware: Middleware) -> ActiveMiddleware {
        ActiveMiddleware {
            plugin: plugin.into(),
            middleware,
        }
    }

    fn ctx() -> Arc<Context> {
        Arc::new(Context::new(RawPayload::new()))
    }

    #[tokio::test]
    async fn test_sequential_stages_see_earlier_mutations() {
        let ok = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&ok);

        // Registered out of order on purpose.
        let pipeline = Pipeline::new([
            active(
                "b",
                Middleware::new(2, move |ctx: Arc<Context>| {
                    let seen = Arc::clone(&seen);
                    async move {
                        assert_eq!(ctx.get("x"), Some(json!(1)));
                        seen.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            ),
            active(
                "a",
                Middleware::new(1, |ctx: Arc<Context>| async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    ctx.insert("x", 1);
                }),
            ),
        ]);

        for _ in 0..10 {
            pipeline.run(ctx()).await;
        }
        assert_eq!(ok.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_next_stage_waits_for_previous() {
        use tokio_test::{assert_pending, assert_ready, task};

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let rx = Arc::new(parking_lot::Mutex::new(Some(rx)));
        let later = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&later);

        let pipeline = Pipeline::new([
            active(
                "gate",
                Middleware::new(1, move |_ctx: Arc<Context>| {
                    let rx = rx.lock().take();
                    async move {
                        if let Some(rx) = rx {
                            let _ = rx.await;
                        }
                    }
                }),
            ),
            active(
                "after",
                Middleware::new(2, move |_ctx: Arc<Context>| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            ),
        ]);

        let mut run = task::spawn(pipeline.run(ctx()));
        assert_pending!(run.poll());
        assert_eq!(later.load(Ordering::SeqCst), 0);

        tx.send(()).unwrap();
        assert!(run.is_woken());
        let _ = assert_ready!(run.poll());
        assert_eq!(later.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stage_order_with_negative_priorities() {
        let pipeline = Pipeline::new([
            active("p", Middleware::blocking(3, |_: &Context| ())),
            active("p", Middleware::blocking(0, |_: &Context| ())),
            active("p", Middleware::blocking(-5, |_: &Context| ())),
        ]);
        assert_eq!(pipeline.priorities().collect::<Vec<_>>(), vec![-5, 0, 3]);
    }

    #[tokio::test]
    async fn test_parallel_tier_runs_concurrently() {
        // Both entries wait on each other; this only completes if they
        // are polled at the same time.
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let entry = |barrier: Arc<tokio::sync::Barrier>| {
            Middleware::new(0, move |_ctx: Arc<Context>| {
                let barrier = Arc::clone(&barrier);
                async move {
                    barrier.wait().await;
                }
            })
        };
        let pipeline = Pipeline::new([
            active("a", entry(Arc::clone(&barrier))),
            active("b", entry(Arc::clone(&barrier))),
        ]);

        tokio::time::timeout(Duration::from_secs(1), pipeline.run(ctx()))
            .await
            .expect("tier 0 must run concurrently");
    }

    #[tokio::test]
    async fn test_clear_stops_later_stages() {
        let later = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&later);
        let pipeline = Pipeline::new([
            active("a", Middleware::blocking(1, |ctx: &Context| ctx.clear())),
            active(
                "b",
                Middleware::new(1, move |_ctx: Arc<Context>| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            ),
        ]);

        let ctx = pipeline.run(ctx()).await;
        assert!(ctx.is_cleared());
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_siblings() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let pipeline = Pipeline::new([
            active(
                "bad",
                Middleware::new(0, |_ctx: Arc<Context>| async {
                    Err::<(), _>("broken")
                }),
            ),
            active("panics", Middleware::blocking(0, |_: &Context| -> () { panic!("boom") })),
            active(
                "good",
                Middleware::new(1, move |_ctx: Arc<Context>| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            ),
        ]);

        let ctx = pipeline.run(ctx()).await;
        assert!(!ctx.is_cleared());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
