//! Plugins.
//!
//! A [`Plugin`] bundles an ordered list of handler entries, an ordered list
//! of middleware and an optional init hook under a unique id:
//!
//! ```rust,ignore
//! let plugin = Plugin::new("echo")
//!     .version("0.1.0")
//!     .description("Repeats what you say")
//!     .middleware(Middleware::new(1, drop_banned_users))
//!     .handler(on_message().matcher(command(["/echo"])).handler(echo))
//!     .on_init(|| async { tracing::info!("echo ready") });
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::{BoxError, Panicked};
use crate::handler::{HandlerEntry, IntoHandlerResult};
use crate::middleware::Middleware;

/// Type of the async init hook stored inside a [`Plugin`].
pub type InitFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Descriptive metadata shown in logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginMetadata {
    pub version: Option<String>,
    pub description: Option<String>,
}

/// A unit of bot behaviour.
pub struct Plugin {
    id: Arc<str>,
    metadata: PluginMetadata,
    handlers: Vec<HandlerEntry>,
    middleware: Vec<Middleware>,
    on_init: Option<InitFn>,
}

impl Plugin {
    /// Starts a plugin with the given unique id.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self {
            id: id.into(),
            metadata: PluginMetadata::default(),
            handlers: Vec::new(),
            middleware: Vec::new(),
            on_init: None,
        }
    }

    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.metadata.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    /// Appends a handler entry. Order of calls is selection order.
    #[must_use]
    pub fn handler(mut self, entry: HandlerEntry) -> Self {
        self.handlers.push(entry);
        self
    }

    /// Appends a middleware entry.
    #[must_use]
    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Sets the init hook, run once before events are accepted.
    #[must_use]
    pub fn on_init<F, Fut, R>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoHandlerResult + 'static,
    {
        self.on_init = Some(Arc::new(move || {
            let fut = f();
            Box::pin(async move { fut.await.into_handler_result() })
        }));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn shared_id(&self) -> Arc<str> {
        Arc::clone(&self.id)
    }

    pub fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    pub fn handlers(&self) -> &[HandlerEntry] {
        &self.handlers
    }

    pub fn middleware_entries(&self) -> &[Middleware] {
        &self.middleware
    }

    pub fn has_init(&self) -> bool {
        self.on_init.is_some()
    }

    /// Returns `true` if the plugin contributes nothing to dispatch.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty() && self.middleware.is_empty()
    }

    /// Runs the init hook, catching panics.
    pub(crate) async fn init(&self) -> Result<(), BoxError> {
        let Some(init) = &self.on_init else {
            return Ok(());
        };
        match AssertUnwindSafe(init()).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(Panicked::from_payload(payload).into()),
        }
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("id", &self.id)
            .field("metadata", &self.metadata)
            .field("handlers", &self.handlers.len())
            .field("middleware", &self.middleware.len())
            .field("has_init", &self.has_init())
            .finish()
    }
}
