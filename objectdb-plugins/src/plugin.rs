//! The plugin trait and the host capability surface it is given.
//!
//! Mirrors the lineage's core plugin trait shape (metadata/initialize/shutdown,
//! see `aerolithdb-plugins::AerolithsPlugin`) but splits the single synchronous
//! `initialize` into an explicit async `setup`/`start`/`stop`, per the
//! REDESIGN FLAGS item on hooks as first-class registry entries rather than
//! something monkey-patched during a generic "initialize" call.
//!
//! `setup` receives a [`PluginHost`] trait object rather than a concrete
//! `Database` handle: `objectdb-core` (which owns `Database`) depends on this
//! crate for the plugin trait, so the trait cannot name `Database` directly
//! without a dependency cycle. `Database` implements `PluginHost`.

use std::sync::Arc;

use async_trait::async_trait;
use objectdb_errors::ObjectDbResult;
use objectdb_events::EventBus;
use objectdb_resource::{Hook, HookPhase};

use crate::storage::PluginStorage;

/// Static identity of a plugin: a unique `id`, a free-form `version` string,
/// and the ids of plugins that must reach `setup-complete` before this one's
/// `setup` runs.
#[derive(Debug, Clone)]
pub struct PluginMetadata {
    pub id: String,
    pub version: String,
    pub depends_on: Vec<String>,
}

impl PluginMetadata {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self { id: id.into(), version: version.into(), depends_on: Vec::new() }
    }

    pub fn depends_on(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = ids.into_iter().map(Into::into).collect();
        self
    }
}

/// Capability surface a plugin is granted during `setup`. Implemented by
/// `objectdb_core::Database`; kept as a trait here so this crate never needs
/// to depend on `objectdb-core`.
pub trait PluginHost: Send + Sync {
    /// Registers a hook, for every operation, on the named resource, or on
    /// every resource (current and future) when `resource_name` is `"*"`.
    fn hook_resource(&self, resource_name: &str, phase: HookPhase, hook: Hook);

    /// The database's root event bus, shared by every resource and plugin.
    fn events(&self) -> EventBus;

    /// A storage handle namespaced to this plugin's own `plugin=<id>/...`
    /// prefix; the prefix is applied at key-generation time, so the plugin
    /// cannot address keys outside it.
    fn plugin_storage(&self, plugin_id: &str) -> PluginStorage;
}

/// A database extension with an explicit async lifecycle
/// (`register → setup → start ⇄ stop → uninstall`).
#[async_trait]
pub trait ObjectDbPlugin: Send + Sync {
    fn metadata(&self) -> PluginMetadata;

    /// Called once, in dependency order, the first time a plugin is
    /// registered with a `Database` (either at `connect` or via a later
    /// `usePlugin`). Idempotent: a plugin must tolerate being asked to set up
    /// more than once if the host retries after a partial failure.
    async fn setup(&self, host: Arc<dyn PluginHost>) -> ObjectDbResult<()>;

    async fn start(&self) -> ObjectDbResult<()>;

    async fn stop(&self) -> ObjectDbResult<()>;
}
