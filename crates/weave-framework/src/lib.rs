//! # Weave Framework
//!
//! The dispatch engine built on top of `weave-core`:
//!
//! - [`matcher`]: the predicate algebra (`AND`, `OR`, `NOT` over events)
//! - [`matcher_builders`]: ready-made matchers (commands, roles, groups, …)
//! - [`handler`]: handler entries and the `on_*` builders
//! - [`middleware`]: priority-staged middleware and the [`Pipeline`]
//! - [`plugin`] / [`registry`]: plugins and the enable/disable registry
//! - [`dispatcher`]: the orchestrator tying everything together
//!
//! ```rust,ignore
//! use weave_framework::prelude::*;
//!
//! let registry = Arc::new(PluginRegistry::new());
//! registry.register(
//!     Plugin::new("echo").handler(on_message().matcher(command(["/echo"])).handler(echo)),
//! )?;
//! let dispatcher = Dispatcher::new(registry, bot);
//! dispatcher.deliver(payload).await;
//! ```

pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod matcher;
pub mod matcher_builders;
pub mod middleware;
pub mod plugin;
pub mod registry;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{
    BoxError, HandlerError, MatcherError, MiddlewareError, Panicked, RegistryError,
    RegistryResult,
};
pub use handler::{
    BoxedHandlerService, Handler, HandlerBuilder, HandlerEntry, HandlerService,
    IntoHandlerResult, on, on_any, on_message, on_meta, on_notice, on_request,
};
pub use matcher::Matcher;
pub use middleware::{ActiveMiddleware, Middleware, PARALLEL_TIER, Pipeline};
pub use plugin::{InitFn, Plugin, PluginMetadata};
pub use registry::{ActiveHandler, PluginRegistry, PluginState};

/// Prelude for common imports.
pub mod prelude {
    pub use super::error::BoxError;
    pub use super::handler::{on, on_any, on_message, on_meta, on_notice, on_request};
    pub use super::matcher::Matcher;
    pub use super::matcher_builders::*;
    pub use super::middleware::Middleware;
    pub use super::plugin::Plugin;
    pub use super::registry::{PluginRegistry, PluginState};
    pub use super::{DispatchOutcome, Dispatcher};
}
