//! # Weave
//!
//! An event-driven dispatch engine for chat bots.
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────────────────── Dispatcher ───────────────────────────┐
//! inbound ──────▶│ API response? ──▶ outbound                                        │
//! payload        │ pending conversation? ──▶ resume the waiting handler              │
//!                │ middleware stages (-n … 0 … n) ──▶ cleared? stop                  │
//!                │ first handler whose kinds + matcher accept the event ──▶ spawn    │
//!                └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **Runtime**: configuration, logging, the inbound loop and shutdown
//! - **Plugins**: named bundles of handlers, middleware and an init hook,
//!   enabled or disabled at runtime
//! - **Matchers**: composable predicates deciding whether a handler fires
//! - **Conversations**: a handler can suspend until the same user speaks again
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use weave::prelude::*;
//!
//! async fn ask_name(event: Event) -> Result<(), BoxError> {
//!     let reply = event.defer(Some("What's your name?".into()), None).await?;
//!     if let Some(reply) = reply {
//!         event.send(format!("Hello, {}!", reply.text())).await?;
//!     }
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = WeaveRuntime::builder().outbound(connection).build()?;
//!     runtime.register_plugin(
//!         Plugin::new("greeter").handler(on_message().matcher(command(["/hello"])).handler(ask_name)),
//!     )?;
//!     runtime.run(inbound_rx).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use weave_core as core;
pub use weave_framework as framework;
pub use weave_runtime as runtime;

/// Commonly used types for building bots.
///
/// ```rust,ignore
/// use weave::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use weave_runtime::{WeaveConfig, WeaveRuntime};

    // Events, messages and the outbound contract
    pub use weave_core::prelude::*;

    // Plugins, handlers, middleware and matchers
    pub use weave_framework::prelude::*;
}
