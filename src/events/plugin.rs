//! Plugin contract and the built-in plugin list.
//!
//! Plugins are resolved by name at startup from `RELAY_PLUGINS`; there is no
//! runtime code loading.

use tracing::{debug, info};

use crate::error::ConfigError;
use crate::events::{self, EventBus, handler};

/// An extension that subscribes to lifecycle events.
pub trait Plugin: Send + Sync {
    /// Name used in `RELAY_PLUGINS`.
    fn name(&self) -> &'static str;

    /// Subscribe this plugin's handlers.
    fn register(&self, bus: &EventBus);
}

/// Logs every lifecycle event with its arguments.
///
/// Does not listen to `skip_send`: the last handler's answer decides the
/// veto, and an observer must not override it.
pub struct AuditLogPlugin;

impl Plugin for AuditLogPlugin {
    fn name(&self) -> &'static str {
        "audit-log"
    }

    fn register(&self, bus: &EventBus) {
        for &event in events::LIFECYCLE_EVENTS {
            if event == events::SKIP_SEND {
                continue;
            }
            bus.subscribe(
                event,
                handler(move |args| {
                    info!(event, args = %args.summary(), "Lifecycle event");
                    Ok(false)
                }),
            );
        }
    }
}

/// Accepts every message without delivering it.
pub struct DryRunPlugin;

impl Plugin for DryRunPlugin {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    fn register(&self, bus: &EventBus) {
        bus.subscribe(events::SKIP_SEND, handler(|_| Ok(true)));
    }
}

/// Look up a built-in plugin by name.
pub fn builtin(name: &str) -> Option<Box<dyn Plugin>> {
    match name {
        "audit-log" => Some(Box::new(AuditLogPlugin)),
        "dry-run" => Some(Box::new(DryRunPlugin)),
        _ => None,
    }
}

/// Resolve a configured plugin list, failing on the first unknown name.
pub fn resolve(names: &[String]) -> Result<Vec<Box<dyn Plugin>>, ConfigError> {
    names
        .iter()
        .map(|name| builtin(name).ok_or_else(|| ConfigError::UnknownPlugin(name.clone())))
        .collect()
}

/// Register plugins in list order (which is also their handler order).
pub fn register_all(bus: &EventBus, plugins: &[Box<dyn Plugin>]) {
    for plugin in plugins {
        plugin.register(bus);
        debug!(plugin = plugin.name(), "Plugin registered");
    }
    if !plugins.is_empty() {
        info!(count = plugins.len(), "Plugins loaded");
    }
}
