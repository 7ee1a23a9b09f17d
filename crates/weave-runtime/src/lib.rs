//! Weave Runtime - configuration, logging and orchestration for the Weave
//! bot engine.
//!
//! This crate provides:
//! - Layered configuration via figment ([`config`])
//! - Logging setup via tracing-subscriber ([`logging`])
//! - [`WeaveRuntime`], which owns the plugin registry and dispatcher and
//!   runs the inbound loop until the channel closes or a signal arrives
//!
//! ```ignore
//! use weave_runtime::WeaveRuntime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = WeaveRuntime::builder().outbound(connection).build()?;
//!     runtime.register_plugin(echo_plugin())?;
//!     runtime.run(inbound_rx).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, WeaveConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, LoggingError, SpanEvents};
pub use runtime::{RuntimeBuilder, WeaveRuntime};

// Re-export tracing for use by plugin crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for plugin code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
