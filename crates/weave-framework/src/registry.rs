//! Plugin registry.
//!
//! [`PluginRegistry`] owns every loaded [`Plugin`] in load order and gates
//! their handlers and middleware behind a per-plugin enable flag.
//!
//! - [`register`](PluginRegistry::register) rejects duplicate ids.
//! - [`set_enabled`](PluginRegistry::set_enabled) may be called at any time,
//!   from any task (including a handler). It affects the next dispatch only;
//!   work already running is never interrupted.
//! - [`active_handlers`](PluginRegistry::active_handlers) /
//!   [`active_middleware`](PluginRegistry::active_middleware) snapshot the
//!   entries of enabled plugins, plugins in load order and entries in
//!   registration order.
//! - [`run_inits`](PluginRegistry::run_inits) runs every init hook once,
//!   concurrently. Failures are logged and never stop the engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::{RegistryError, RegistryResult};
use crate::handler::HandlerEntry;
use crate::middleware::ActiveMiddleware;
use crate::plugin::Plugin;

/// Runtime state of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginState {
    pub enabled: bool,
}

/// A handler entry together with the plugin that owns it.
#[derive(Debug, Clone)]
pub struct ActiveHandler {
    pub plugin: Arc<str>,
    pub entry: HandlerEntry,
}

struct PluginEntry {
    plugin: Arc<Plugin>,
    enabled: AtomicBool,
}

/// The set of loaded plugins.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<Vec<PluginEntry>>,
    inits_ran: AtomicBool,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Registers an enabled plugin.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateId`] if the id is taken.
    pub fn register(&self, plugin: Plugin) -> RegistryResult<()> {
        self.register_with_state(plugin, PluginState { enabled: true })
    }

    /// Registers a plugin with an explicit initial state.
    pub fn register_with_state(&self, plugin: Plugin, state: PluginState) -> RegistryResult<()> {
        let mut plugins = self.plugins.write();
        if plugins.iter().any(|e| e.plugin.id() == plugin.id()) {
            return Err(RegistryError::DuplicateId(plugin.id().to_string()));
        }

        if plugin.is_empty() {
            warn!(plugin = %plugin.id(), "Plugin has neither handlers nor middleware");
        }
        if plugin.has_init() && self.inits_ran.load(Ordering::Acquire) {
            warn!(
                plugin = %plugin.id(),
                "Plugin registered after init hooks ran; its init hook will not run"
            );
        }

        info!(
            plugin = %plugin.id(),
            version = plugin.metadata().version.as_deref().unwrap_or("-"),
            handlers = plugin.handlers().len(),
            middleware = plugin.middleware_entries().len(),
            enabled = state.enabled,
            "Plugin registered"
        );

        plugins.push(PluginEntry {
            plugin: Arc::new(plugin),
            enabled: AtomicBool::new(state.enabled),
        });
        Ok(())
    }

    // ─── Control ─────────────────────────────────────────────────────────────

    /// Enables or disables a plugin for subsequent dispatches.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownPlugin`] if no plugin has this id.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> RegistryResult<()> {
        let plugins = self.plugins.read();
        let entry = plugins
            .iter()
            .find(|e| e.plugin.id() == id)
            .ok_or_else(|| RegistryError::UnknownPlugin(id.to_string()))?;

        let previous = entry.enabled.swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            info!(plugin = %id, enabled, "Plugin state changed");
        }
        Ok(())
    }

    /// Returns the state of the plugin, or `None` if unknown.
    pub fn state(&self, id: &str) -> Option<PluginState> {
        self.plugins
            .read()
            .iter()
            .find(|e| e.plugin.id() == id)
            .map(|e| PluginState {
                enabled: e.enabled.load(Ordering::Acquire),
            })
    }

    /// Returns every plugin id with its state, in load order.
    pub fn states(&self) -> Vec<(String, PluginState)> {
        self.plugins
            .read()
            .iter()
            .map(|e| {
                (
                    e.plugin.id().to_string(),
                    PluginState {
                        enabled: e.enabled.load(Ordering::Acquire),
                    },
                )
            })
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.plugins.read().iter().any(|e| e.plugin.id() == id)
    }

    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.read().is_empty()
    }

    // ─── Dispatch snapshots ──────────────────────────────────────────────────

    fn enabled_plugins(&self) -> Vec<Arc<Plugin>> {
        self.plugins
            .read()
            .iter()
            .filter(|e| e.enabled.load(Ordering::Acquire))
            .map(|e| Arc::clone(&e.plugin))
            .collect()
    }

    /// Handler entries of enabled plugins, in selection order.
    pub fn active_handlers(&self) -> Vec<ActiveHandler> {
        self.enabled_plugins()
            .iter()
            .flat_map(|plugin| {
                let id = plugin.shared_id();
                plugin.handlers().iter().map(move |entry| ActiveHandler {
                    plugin: Arc::clone(&id),
                    entry: entry.clone(),
                })
            })
            .collect()
    }

    /// Middleware of enabled plugins, ungrouped.
    pub fn active_middleware(&self) -> Vec<ActiveMiddleware> {
        self.enabled_plugins()
            .iter()
            .flat_map(|plugin| {
                let id = plugin.shared_id();
                plugin
                    .middleware_entries()
                    .iter()
                    .map(move |middleware| ActiveMiddleware {
                        plugin: Arc::clone(&id),
                        middleware: middleware.clone(),
                    })
            })
            .collect()
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Runs every plugin's init hook concurrently.
    ///
    /// Only the first call does anything. Returns the number of hooks that
    /// failed.
    pub async fn run_inits(&self) -> usize {
        if self.inits_ran.swap(true, Ordering::AcqRel) {
            debug!("Init hooks already ran, skipping");
            return 0;
        }

        let plugins: Vec<Arc<Plugin>> = self
            .plugins
            .read()
            .iter()
            .map(|e| Arc::clone(&e.plugin))
            .filter(|p| p.has_init())
            .collect();

        let results = future::join_all(plugins.iter().map(|plugin| async move {
            let result = plugin.init().await;
            (plugin, result)
        }))
        .await;

        let mut failed = 0;
        for (plugin, result) in results {
            match result {
                Ok(()) => info!(plugin = %plugin.id(), "Plugin initialized"),
                Err(e) => {
                    failed += 1;
                    error!(plugin = %plugin.id(), error = %e, "Plugin init hook failed");
                }
            }
        }
        failed
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.states())
            .field("inits_ran", &self.inits_ran.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use weave_core::{Context, Event};

    use crate::handler::on_message;
    use crate::middleware::Middleware;

    async fn noop(_event: Event) {}

    async fn exploding_init() {
        panic!("init exploded")
    }

    fn plugin(id: &str, handlers: usize) -> Plugin {
        let mut plugin = Plugin::new(id).middleware(Middleware::blocking(1, |_: &Context| ()));
        for i in 0..handlers {
            plugin = plugin.handler(on_message().name(format!("{id}-{i}")).handler(noop));
        }
        plugin
    }

    fn handler_names(registry: &PluginRegistry) -> Vec<String> {
        registry
            .active_handlers()
            .iter()
            .map(|h| h.entry.name().to_string())
            .collect()
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let registry = PluginRegistry::new();
        registry.register(plugin("a", 1)).unwrap();
        assert_eq!(
            registry.register(plugin("a", 1)),
            Err(RegistryError::DuplicateId("a".into()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_plugin() {
        let registry = PluginRegistry::new();
        assert_eq!(
            registry.set_enabled("ghost", false),
            Err(RegistryError::UnknownPlugin("ghost".into()))
        );
        assert_eq!(registry.state("ghost"), None);
    }

    #[test]
    fn test_active_entries_follow_load_order() {
        let registry = PluginRegistry::new();
        registry.register(plugin("a", 2)).unwrap();
        registry.register(plugin("b", 1)).unwrap();
        assert_eq!(handler_names(&registry), vec!["a-0", "a-1", "b-0"]);
        assert_eq!(registry.active_middleware().len(), 2);
    }

    #[test]
    fn test_disable_then_enable_restores_same_set() {
        let registry = PluginRegistry::new();
        registry.register(plugin("a", 2)).unwrap();
        registry.register(plugin("b", 1)).unwrap();
        let before = handler_names(&registry);

        registry.set_enabled("a", false).unwrap();
        assert_eq!(handler_names(&registry), vec!["b-0"]);
        assert_eq!(registry.active_middleware().len(), 1);
        assert_eq!(registry.state("a"), Some(PluginState { enabled: false }));

        registry.set_enabled("a", true).unwrap();
        assert_eq!(handler_names(&registry), before);
        assert_eq!(registry.active_middleware().len(), 2);
    }

    #[test]
    fn test_registered_disabled() {
        let registry = PluginRegistry::new();
        registry
            .register_with_state(plugin("a", 1), PluginState { enabled: false })
            .unwrap();
        assert!(registry.active_handlers().is_empty());
        assert_eq!(
            registry.states(),
            vec![("a".to_string(), PluginState { enabled: false })]
        );
    }

    #[tokio::test]
    async fn test_run_inits_once_and_isolates_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = PluginRegistry::new();

        let counter = Arc::clone(&calls);
        registry
            .register(plugin("ok", 1).on_init(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }))
            .unwrap();
        registry
            .register(plugin("fails", 1).on_init(|| async { Err::<(), _>("no config") }))
            .unwrap();
        registry
            .register(plugin("panics", 1).on_init(exploding_init))
            .unwrap();

        assert_eq!(registry.run_inits().await, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(registry.run_inits().await, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
