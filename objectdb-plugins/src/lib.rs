//! The plugin lifecycle framework (spec §4.7): a trait, a dependency-ordered
//! manager, and namespaced storage — built on top of [`objectdb_resource`]'s
//! hook registry and [`objectdb_events`]'s bus rather than anything owned
//! privately by this crate.

mod manager;
mod plugin;
mod storage;

pub use manager::{PluginError, PluginManager, PluginState};
pub use plugin::{ObjectDbPlugin, PluginHost, PluginMetadata};
pub use storage::PluginStorage;
