//! Runtime orchestration.
//!
//! [`WeaveRuntime`] owns the loaded configuration, the plugin registry and
//! the dispatcher, and drives the inbound loop:
//!
//! ```rust,ignore
//! let runtime = WeaveRuntime::builder()
//!     .config_file("weave.toml")
//!     .outbound(connection)
//!     .build()?;
//!
//! runtime.register_plugin(echo_plugin())?;
//! runtime.run(inbound_rx).await?;
//! ```
//!
//! `run` runs init hooks, then delivers payloads in arrival order until the
//! channel closes or Ctrl+C / SIGTERM arrives, then shuts down.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use weave_core::{Bot, BoxedOutbound, ConversationRegistry, DisabledOutbound, RawPayload};
use weave_framework::{DispatchOutcome, Dispatcher, Plugin, PluginRegistry, PluginState};

use crate::config::{ConfigLoader, WeaveConfig, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// The Weave runtime.
pub struct WeaveRuntime {
    config: WeaveConfig,
    registry: Arc<PluginRegistry>,
    dispatcher: Dispatcher,
    stopped: AtomicBool,
}

impl WeaveRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    fn from_parts(config: WeaveConfig, outbound: BoxedOutbound) -> Self {
        let mut conversations = ConversationRegistry::new();
        if let Some(limit) = config.dispatch.max_pending_conversations {
            conversations = conversations.with_capacity_limit(limit);
        }
        let bot = Bot::with_conversations(outbound, Arc::new(conversations));
        let registry = Arc::new(PluginRegistry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry), bot);

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            max_pending_conversations = ?config.dispatch.max_pending_conversations,
            "Runtime initialized from configuration"
        );

        Self {
            config,
            registry,
            dispatcher,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &WeaveConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn bot(&self) -> &Bot {
        self.dispatcher.bot()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    // =========================================================================
    // Plugins
    // =========================================================================

    /// Registers a plugin, applying its `plugins.<id>.enabled` setting.
    ///
    /// Plugins not listed in the configuration start enabled.
    pub fn register_plugin(&self, plugin: Plugin) -> RuntimeResult<()> {
        let enabled = self.config.plugin_enabled(plugin.id()).unwrap_or(true);
        if !enabled {
            debug!(plugin = %plugin.id(), "Plugin disabled by configuration");
        }
        self.registry
            .register_with_state(plugin, PluginState { enabled })?;
        Ok(())
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> RuntimeResult<()> {
        self.registry.set_enabled(id, enabled)?;
        Ok(())
    }

    pub fn plugin_state(&self, id: &str) -> Option<PluginState> {
        self.registry.state(id)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Runs every plugin's init hook. Returns the number that failed.
    ///
    /// Only the first call runs the hooks.
    pub async fn start(&self) -> RuntimeResult<usize> {
        if self.is_stopped() {
            return Err(RuntimeError::Stopped);
        }
        let failed = self.registry.run_inits().await;
        info!(plugins = self.registry.len(), failed, "Runtime started");
        Ok(failed)
    }

    /// Delivers one inbound payload.
    pub async fn deliver(&self, payload: RawPayload) -> RuntimeResult<DispatchOutcome> {
        if self.is_stopped() {
            return Err(RuntimeError::Stopped);
        }
        Ok(self.dispatcher.deliver(payload).await)
    }

    /// Parses a JSON text frame and delivers it.
    pub async fn deliver_text(&self, text: &str) -> RuntimeResult<DispatchOutcome> {
        match serde_json::from_str(text)? {
            Value::Object(payload) => self.deliver(payload).await,
            _ => Err(RuntimeError::NotAnObject),
        }
    }

    /// Runs until `inbound` closes or a shutdown signal arrives.
    pub async fn run(&self, inbound: mpsc::Receiver<RawPayload>) -> RuntimeResult<()> {
        self.run_until(inbound, wait_for_signal()).await
    }

    /// Runs until `inbound` closes or `shutdown` completes.
    pub async fn run_until<F>(
        &self,
        mut inbound: mpsc::Receiver<RawPayload>,
        shutdown: F,
    ) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        info!("Weave runtime is now running");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                payload = inbound.recv() => match payload {
                    Some(payload) => {
                        let outcome = self.deliver(payload).await?;
                        debug!(?outcome, "Payload delivered");
                    }
                    None => {
                        info!("Inbound channel closed");
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Cancels pending conversations and waits for running handlers.
    ///
    /// Uses `dispatch.shutdown_grace_ms` as the grace period. Returns `true`
    /// if every handler finished in time. Later calls return `true` at once.
    pub async fn shutdown(&self) -> bool {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return true;
        }
        info!("Stopping Weave runtime");
        let clean = self
            .dispatcher
            .shutdown(self.config.dispatch.shutdown_grace())
            .await;
        info!(clean, "Runtime stopped");
        clean
    }
}

impl std::fmt::Debug for WeaveRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeaveRuntime")
            .field("registry", &self.registry)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

/// Waits for Ctrl+C, or SIGTERM on unix.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`WeaveRuntime`].
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    config: Option<WeaveConfig>,
    outbound: Option<BoxedOutbound>,
    init_logging: bool,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            config: None,
            outbound: None,
            init_logging: true,
        }
    }

    /// Uses an already loaded configuration instead of searching for one.
    pub fn config(mut self, config: WeaveConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: WeaveConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Sets the outbound channel. Defaults to [`DisabledOutbound`].
    pub fn outbound(mut self, outbound: BoxedOutbound) -> Self {
        self.outbound = Some(outbound);
        self
    }

    /// Skips installing the global tracing subscriber.
    pub fn without_logging(mut self) -> Self {
        self.init_logging = false;
        self
    }

    pub fn build(self) -> RuntimeResult<WeaveRuntime> {
        let config = match self.config {
            Some(config) => {
                validate_config(&config)?;
                config
            }
            None => self.config_loader.load()?,
        };

        if self.init_logging {
            logging::init_from_config(&config.logging);
        }

        let outbound = self
            .outbound
            .unwrap_or_else(|| Arc::new(DisabledOutbound));
        Ok(WeaveRuntime::from_parts(config, outbound))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;
    use weave_core::{Context, ConversationError, ConversationKey, Event};
    use weave_framework::{Middleware, RegistryError, on_message};

    use crate::config::PluginSettings;

    fn runtime(config: WeaveConfig) -> WeaveRuntime {
        WeaveRuntime::builder()
            .config(config)
            .without_logging()
            .build()
            .unwrap()
    }

    fn private_message(text: &str) -> RawPayload {
        let Value::Object(map) = json!({
            "post_type": "message",
            "message_type": "private",
            "self_id": 1,
            "user_id": 7,
            "message": text,
            "sender": { "nickname": "alice" }
        }) else {
            unreachable!()
        };
        map
    }

    async fn noop(_event: Event) {}

    #[test]
    fn test_configured_plugin_state() {
        let mut config = WeaveConfig::default();
        config
            .plugins
            .insert("admin".into(), PluginSettings { enabled: false });
        let runtime = runtime(config);

        runtime
            .register_plugin(Plugin::new("admin").handler(on_message().handler(noop)))
            .unwrap();
        runtime
            .register_plugin(Plugin::new("echo").handler(on_message().handler(noop)))
            .unwrap();

        assert_eq!(
            runtime.plugin_state("admin"),
            Some(PluginState { enabled: false })
        );
        assert_eq!(
            runtime.plugin_state("echo"),
            Some(PluginState { enabled: true })
        );

        runtime.set_enabled("admin", true).unwrap();
        assert_eq!(
            runtime.plugin_state("admin"),
            Some(PluginState { enabled: true })
        );
    }

    #[test]
    fn test_registry_errors_surface() {
        let runtime = runtime(WeaveConfig::default());
        runtime.register_plugin(Plugin::new("a")).unwrap();
        assert!(matches!(
            runtime.register_plugin(Plugin::new("a")),
            Err(RuntimeError::Registry(RegistryError::DuplicateId(_)))
        ));
        assert!(matches!(
            runtime.set_enabled("ghost", false),
            Err(RuntimeError::Registry(RegistryError::UnknownPlugin(_)))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = WeaveConfig::default();
        config.logging.max_files = 0;
        let result = WeaveRuntime::builder()
            .config(config)
            .without_logging()
            .build();
        assert!(matches!(result, Err(RuntimeError::Config(_))));
    }

    #[tokio::test]
    async fn test_run_delivers_in_arrival_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let runtime = runtime(WeaveConfig::default());
        runtime
            .register_plugin(
                Plugin::new("order")
                    .middleware(Middleware::blocking(1, move |ctx: &Context| {
                        if let Some(Value::String(text)) = ctx.get("message") {
                            recorder.lock().push(text);
                        }
                    }))
                    .handler(on_message().handler(noop)),
            )
            .unwrap();

        let (tx, rx) = mpsc::channel(8);
        for text in ["one", "two", "three"] {
            tx.send(private_message(text)).await.unwrap();
        }
        drop(tx);

        runtime
            .run_until(rx, std::future::pending())
            .await
            .unwrap();
        assert_eq!(*seen.lock(), vec!["one", "two", "three"]);
        assert!(runtime.is_stopped());
    }

    #[tokio::test]
    async fn test_start_runs_inits_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let runtime = runtime(WeaveConfig::default());
        runtime
            .register_plugin(
                Plugin::new("init")
                    .handler(on_message().handler(noop))
                    .on_init(move || {
                        let counter = Arc::clone(&counter);
                        async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                        }
                    }),
            )
            .unwrap();

        assert_eq!(runtime.start().await.unwrap(), 0);
        assert_eq!(runtime.start().await.unwrap(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deliver_after_shutdown_rejected() {
        let runtime = runtime(WeaveConfig::default());
        assert!(runtime.shutdown().await);
        assert!(matches!(
            runtime.deliver(private_message("late")).await,
            Err(RuntimeError::Stopped)
        ));
        assert!(runtime.shutdown().await);
    }

    #[tokio::test]
    async fn test_deliver_text() {
        let runtime = runtime(WeaveConfig::default());
        runtime
            .register_plugin(Plugin::new("echo").handler(on_message().name("echo").handler(noop)))
            .unwrap();

        let outcome = runtime
            .deliver_text(&Value::Object(private_message("hi")).to_string())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Invoked {
                plugin: "echo".into(),
                handler: "echo".into()
            }
        );

        assert!(matches!(
            runtime.deliver_text("not json").await,
            Err(RuntimeError::InvalidPayload(_))
        ));
        assert!(matches!(
            runtime.deliver_text("[1, 2]").await,
            Err(RuntimeError::NotAnObject)
        ));
    }

    #[tokio::test]
    async fn test_conversation_limit_from_config() {
        let mut config = WeaveConfig::default();
        config.dispatch.max_pending_conversations = Some(1);
        let runtime = runtime(config);
        let conversations = runtime.bot().conversations();

        let _first = conversations
            .register(ConversationKey::User { user_id: 1 }, Some(Duration::from_secs(5)))
            .unwrap();
        assert!(matches!(
            conversations.register(ConversationKey::User { user_id: 2 }, None),
            Err(ConversationError::Saturated { limit: 1 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_waiting_handler() {
        let runtime = runtime(WeaveConfig::default());
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        runtime
            .register_plugin(Plugin::new("ask").handler(on_message().handler(
                move |event: Event| {
                    let flag = Arc::clone(&flag);
                    async move {
                        let result = event.defer(None, Some(Duration::from_secs(60))).await;
                        flag.store(
                            matches!(result, Err(ConversationError::Cancelled)),
                            Ordering::SeqCst,
                        );
                    }
                },
            )))
            .unwrap();

        runtime.deliver(private_message("start")).await.unwrap();
        tokio::task::yield_now().await;
        assert!(runtime.shutdown().await);
        assert!(cancelled.load(Ordering::SeqCst));
    }
}
