//! Asynchronous, best-effort, in-process publish/subscribe.
//!
//! `emit` never blocks the caller: it pushes onto an unbounded channel drained
//! by a single background dispatcher task, which preserves delivery order for
//! events of the same name (and, as a side effect of the single-dispatcher
//! design, across names too — a strictly stronger guarantee than the spec
//! requires, never a weaker one). A subscriber that errors is logged and does
//! not interrupt delivery to the remaining subscribers. There is no
//! persistence or replay: a subscription registered after an `emit` never
//! sees it.
//!
//! Core lifecycle events are a sealed enum (`ResourceEvent`, `PluginEvent`);
//! plugins publish under an opaque `plugin:<id>:*` namespace the bus treats
//! as an uninterpreted subscription key.

use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// The phase a resource-pipeline event fired in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourcePhase {
    Before,
    After,
    OnError,
}

impl ResourcePhase {
    fn as_str(self) -> &'static str {
        match self {
            ResourcePhase::Before => "before",
            ResourcePhase::After => "after",
            ResourcePhase::OnError => "error",
        }
    }
}

/// Sealed set of core resource-operation lifecycle events. Always published
/// under the name `{resource}:{phase}:{op}`, e.g. `orders:after:insert`.
#[derive(Debug, Clone)]
pub struct ResourceEvent {
    pub resource: String,
    pub phase: ResourcePhase,
    pub op: String,
}

impl ResourceEvent {
    pub fn name(&self) -> String {
        format!("{}:{}:{}", self.resource, self.phase.as_str(), self.op)
    }
}

/// Sealed set of plugin lifecycle events, published under `plugin:{id}:{variant}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginLifecycleEvent {
    Registered,
    SetupComplete,
    Started,
    Stopped,
    Uninstalled,
    SetupFailed,
}

impl PluginLifecycleEvent {
    pub fn name(self, plugin_id: &str) -> String {
        let variant = match self {
            PluginLifecycleEvent::Registered => "registered",
            PluginLifecycleEvent::SetupComplete => "setup_complete",
            PluginLifecycleEvent::Started => "started",
            PluginLifecycleEvent::Stopped => "stopped",
            PluginLifecycleEvent::Uninstalled => "uninstalled",
            PluginLifecycleEvent::SetupFailed => "setup_failed",
        };
        format!("plugin:{plugin_id}:{variant}")
    }
}

type HandlerFut = Pin<Box<dyn Future<Output = ()> + Send>>;
type Handler = Arc<dyn Fn(Value) -> HandlerFut + Send + Sync>;

struct Subscription {
    id: u64,
    pattern: String,
    handler: Handler,
}

/// Matches `event:*` subscriber patterns against a concrete event name.
fn pattern_matches(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}

struct EmitMsg {
    name: String,
    payload: Value,
}

/// Named, asynchronous, best-effort publish/subscribe bus. One instance lives
/// on `Database` and is shared (by clone) with every plugin.
#[derive(Clone)]
pub struct EventBus {
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    tx: mpsc::UnboundedSender<EmitMsg>,
    next_id: Arc<std::sync::atomic::AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        let subscriptions: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));
        let (tx, mut rx) = mpsc::unbounded_channel::<EmitMsg>();

        let dispatch_subs = subscriptions.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let subs = dispatch_subs.lock().await;
                let matching: Vec<Handler> = subs
                    .iter()
                    .filter(|s| pattern_matches(&s.pattern, &msg.name))
                    .map(|s| s.handler.clone())
                    .collect();
                drop(subs);
                for handler in matching {
                    handler(msg.payload.clone()).await;
                }
            }
        });

        Self { subscriptions, tx, next_id: Arc::new(std::sync::atomic::AtomicU64::new(1)) }
    }

    /// Schedule delivery to current subscribers and return immediately. A
    /// no-op (not an error) if nobody is subscribed.
    pub fn emit(&self, name: impl Into<String>, payload: Value) {
        let name = name.into();
        debug!(event = %name, "emitting event");
        // An unbounded send only fails if the dispatcher task has been
        // dropped (bus torn down); that is not the emitter's problem.
        let _ = self.tx.send(EmitMsg { name, payload });
    }

    /// Subscribe to an exact event name or a `prefix*` wildcard. Returns a
    /// token usable with `off`.
    pub async fn on<F, Fut>(&self, pattern: impl Into<String>, handler: F) -> u64
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let pattern = pattern.into();
        let wrapped: Handler = Arc::new(move |payload| {
            let fut = handler(payload);
            Box::pin(async move {
                fut.await;
            }) as HandlerFut
        });
        self.subscriptions.lock().await.push(Subscription { id, pattern, handler: wrapped });
        id
    }

    /// Subscribe with a handler that can fail; failures are logged and never
    /// propagate to the emitter or to other subscribers.
    pub async fn on_fallible<F, Fut>(&self, pattern: impl Into<String>, handler: F) -> u64
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let pattern_for_log = pattern.into();
        let log_pattern = pattern_for_log.clone();
        self.on(pattern_for_log, move |payload| {
            let fut = handler(payload);
            let log_pattern = log_pattern.clone();
            async move {
                if let Err(err) = fut.await {
                    warn!(pattern = %log_pattern, error = %err, "event subscriber failed");
                }
            }
        })
        .await
    }

    pub async fn off(&self, id: u64) {
        self.subscriptions.lock().await.retain(|s| s.id != id);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn emit_with_no_subscribers_is_a_noop() {
        let bus = EventBus::new();
        bus.emit("orders:after:insert", serde_json::json!({}));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn delivery_order_matches_emit_order_within_a_name() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        bus.on("orders:after:insert", move |payload| {
            let seen = seen_clone.clone();
            async move {
                seen.lock().await.push(payload["n"].as_i64().unwrap());
            }
        })
        .await;

        for n in 0..5 {
            bus.emit("orders:after:insert", serde_json::json!({ "n": n }));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn wildcard_subscriber_receives_matching_events() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        bus.on("orders:*", move |_payload| {
            let count = count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        bus.emit("orders:after:insert", serde_json::json!({}));
        bus.emit("orders:before:update", serde_json::json!({}));
        bus.emit("invoices:after:insert", serde_json::json!({}));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn subscriber_error_does_not_stop_other_subscribers() {
        let bus = EventBus::new();
        let second_ran = Arc::new(AtomicUsize::new(0));
        bus.on_fallible("boom", |_payload| async move {
            anyhow::bail!("first subscriber always fails")
        })
        .await;
        let second_ran_clone = second_ran.clone();
        bus.on("boom", move |_payload| {
            let second_ran = second_ran_clone.clone();
            async move {
                second_ran.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        bus.emit("boom", serde_json::json!({}));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(second_ran.load(Ordering::SeqCst), 1);
    }
}
