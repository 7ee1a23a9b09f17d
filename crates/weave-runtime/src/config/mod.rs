//! Configuration for the Weave runtime.
//!
//! Layered loading (defaults, files, `WEAVE_*` environment variables) and
//! validation of logging, dispatch and per-plugin settings.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    DispatchConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, PluginSettings,
    SpanEventConfig, WeaveConfig,
};
pub use validation::validate_config;
