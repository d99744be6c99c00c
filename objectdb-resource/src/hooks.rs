//! Hooks as first-class registry entries (spec §9 DESIGN NOTES): never
//! monkey-patched onto a live `Resource`, always looked up from this
//! registry at call time. `Resource` itself stays immutable after
//! construction; only the registry's interior `RwLock` mutates, and only
//! through `register`.

use futures::future::BoxFuture;
use objectdb_errors::ObjectDbResult;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::OpContext;
use crate::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    Before,
    After,
    OnError,
}

impl HookPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            HookPhase::Before => "before",
            HookPhase::After => "after",
            HookPhase::OnError => "on:error",
        }
    }
}

pub type Hook = Arc<dyn Fn(OpContext, Record) -> BoxFuture<'static, ObjectDbResult<Record>> + Send + Sync>;

#[derive(Default)]
pub struct HookRegistry {
    entries: RwLock<HashMap<(HookPhase, String), Vec<Hook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook for `op` (e.g. `"insert"`) under `phase`. `op` may be
    /// the literal operation name or `"*"` to run for every operation.
    pub fn register(&self, phase: HookPhase, op: impl Into<String>, hook: Hook) {
        self.entries.write().entry((phase, op.into())).or_default().push(hook);
    }

    /// All hooks registered for this exact op plus any registered under the
    /// `"*"` wildcard, wildcard hooks running first.
    pub fn hooks_for(&self, phase: HookPhase, op: &str) -> Vec<Hook> {
        let entries = self.entries.read();
        let mut hooks = entries.get(&(phase, "*".to_string())).cloned().unwrap_or_default();
        hooks.extend(entries.get(&(phase, op.to_string())).cloned().unwrap_or_default());
        hooks
    }
}

/// Runs `before` hooks in registration order; the first one to fail aborts
/// the pipeline with its error (spec §4.5).
pub async fn run_before(registry: &HookRegistry, ctx: &OpContext, op: &str, mut record: Record) -> ObjectDbResult<Record> {
    for hook in registry.hooks_for(HookPhase::Before, op) {
        record = hook(ctx.clone(), record).await?;
    }
    Ok(record)
}

/// Runs `after` hooks; a failure here never undoes the already-persisted
/// write. The caller is expected to emit `HookFailed` for any error this
/// returns.
pub async fn run_after(registry: &HookRegistry, ctx: &OpContext, op: &str, mut record: Record) -> (Record, Vec<objectdb_errors::ObjectDbError>) {
    let mut errors = Vec::new();
    for hook in registry.hooks_for(HookPhase::After, op) {
        match hook(ctx.clone(), record.clone()).await {
            Ok(updated) => record = updated,
            Err(err) => errors.push(err),
        }
    }
    (record, errors)
}
