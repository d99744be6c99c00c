//! A minimal demonstration of the replicator contract named in spec §6.3:
//! a plugin that fans every after-phase write out to one or more external
//! destinations, at-most-once per write, with its own bounded retry.
//!
//! Grounded on [`objectdb_plugins`]'s `ObjectDbPlugin`/`PluginHost` split for
//! the lifecycle shape. The core engine's after-phase event payload already
//! carries the full record (see `objectdb-resource/src/resource.rs`'s
//! `record_event_payload`), but this plugin still fans out through the
//! `after` hook registry rather than the bus: a hook runs synchronously
//! inside the write's own pipeline, so a replication attempt (and its
//! retries) is tied to the operation that produced it, instead of racing an
//! async bus dispatch. It also subscribes to the event bus for the
//! lightweight "something changed" signal the specification describes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use objectdb_errors::ObjectDbResult;
use objectdb_events::EventBus;
use objectdb_plugins::{ObjectDbPlugin, PluginHost, PluginMetadata, PluginStorage};
use objectdb_resource::{HookPhase, OpContext, Record};
use objectdb_schema::AttributeMap;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::warn;

/// The operations the replicator fans out. `get`/`exists` hit the same
/// after-phase hook point but are not mutations, so they are filtered out.
fn is_mutation(op: &str) -> bool {
    matches!(op, "insert" | "update" | "upsert" | "delete")
}

/// One replicated change, serialized for a destination or for the
/// plugin-private change log.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeRecord {
    pub resource: String,
    pub op: String,
    pub record_id: String,
    pub attributes: AttributeMap,
}

/// An external fanout target. `objectdb-plugin-replicator` ships no real
/// destinations (that integration is out of scope per spec §1's "the
/// multi-destination replicator" non-goal) — callers provide their own.
#[async_trait]
pub trait ReplicationDestination: Send + Sync {
    fn name(&self) -> &str;
    async fn replicate(&self, change: &ChangeRecord) -> anyhow::Result<()>;
}

/// Bounded-attempt, fixed-delay retry around a single destination's
/// `replicate` call. A destination that still fails after the budget is
/// skipped for this change — at-most-once, never re-queued (spec §6.3
/// "replication is at-most-once per emit with plugin-level retry").
async fn replicate_with_retry(destination: &dyn ReplicationDestination, change: &ChangeRecord, max_attempts: u32, delay: Duration) {
    for attempt in 0..max_attempts {
        match destination.replicate(change).await {
            Ok(()) => return,
            Err(err) => {
                warn!(destination = destination.name(), attempt, error = %err, "replication attempt failed");
                if attempt + 1 < max_attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    warn!(destination = destination.name(), resource = %change.resource, record_id = %change.record_id, "replication exhausted retry budget, dropping change");
}

/// The shared state behind a `ReplicatorPlugin`, held by `Arc` so the
/// `after`-hook and event-bus closures registered in `setup` can each hold
/// their own handle without borrowing `self`.
struct Inner {
    destinations: Vec<Arc<dyn ReplicationDestination>>,
    max_attempts: u32,
    retry_delay: Duration,
    storage: RwLock<Option<PluginStorage>>,
    events_seen: AtomicU64,
}

impl Inner {
    fn storage(&self) -> PluginStorage {
        self.storage.read().clone().expect("ReplicatorPlugin::setup must run before use")
    }

    async fn append_change_log(&self, change: &ChangeRecord) -> ObjectDbResult<()> {
        let body = serde_json::to_vec(change).expect("ChangeRecord always serializes");
        let key = format!("changes/{}/{}", change.resource, objectdb_resource::generate_id());
        self.storage().put(&key, body, HashMap::new(), Default::default()).await
    }

    async fn on_after_write(&self, ctx: OpContext, record: Record) -> ObjectDbResult<Record> {
        if !is_mutation(&ctx.op) {
            return Ok(record);
        }

        let change =
            ChangeRecord { resource: ctx.resource.clone(), op: ctx.op.clone(), record_id: record.id.clone(), attributes: record.attributes.clone() };

        if let Err(err) = self.append_change_log(&change).await {
            warn!(resource = %ctx.resource, error = %err, "failed to append replicator change log");
        }

        for destination in &self.destinations {
            replicate_with_retry(destination.as_ref(), &change, self.max_attempts, self.retry_delay).await;
        }

        Ok(record)
    }
}

pub struct ReplicatorPlugin(Arc<Inner>);

impl ReplicatorPlugin {
    pub fn new(destinations: Vec<Arc<dyn ReplicationDestination>>) -> Arc<Self> {
        Arc::new(Self(Arc::new(Inner {
            destinations,
            max_attempts: 3,
            retry_delay: Duration::from_millis(50),
            storage: RwLock::new(None),
            events_seen: AtomicU64::new(0),
        })))
    }

    pub fn with_retry(destinations: Vec<Arc<dyn ReplicationDestination>>, max_attempts: u32, retry_delay: Duration) -> Arc<Self> {
        Arc::new(Self(Arc::new(Inner { destinations, max_attempts, retry_delay, storage: RwLock::new(None), events_seen: AtomicU64::new(0) })))
    }

    /// Count of core lifecycle events observed on the bus, independent of
    /// the hook-driven fanout above; exposed for tests and introspection.
    pub fn events_seen(&self) -> u64 {
        self.0.events_seen.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectDbPlugin for ReplicatorPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new("replicator", "0.1.0")
    }

    async fn setup(&self, host: Arc<dyn PluginHost>) -> ObjectDbResult<()> {
        *self.0.storage.write() = Some(host.plugin_storage("replicator"));

        let inner = self.0.clone();
        host.hook_resource(
            "*",
            HookPhase::After,
            Arc::new(move |ctx: OpContext, record: Record| -> BoxFuture<'static, ObjectDbResult<Record>> {
                let inner = inner.clone();
                Box::pin(async move { inner.on_after_write(ctx, record).await })
            }),
        );

        let inner = self.0.clone();
        let events: EventBus = host.events();
        events
            .on("*:after:*", move |_payload| {
                let inner = inner.clone();
                async move {
                    inner.events_seen.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        Ok(())
    }

    async fn start(&self) -> ObjectDbResult<()> {
        Ok(())
    }

    async fn stop(&self) -> ObjectDbResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objectdb_core::{Database, DatabaseConfig, ResourceInit};
    use objectdb_schema::{AttributeValue, FieldSpec};
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    struct RecordingDestination {
        seen: Arc<Mutex<Vec<ChangeRecord>>>,
    }

    #[async_trait]
    impl ReplicationDestination for RecordingDestination {
        fn name(&self) -> &str {
            "recording"
        }

        async fn replicate(&self, change: &ChangeRecord) -> anyhow::Result<()> {
            self.seen.lock().push(change.clone());
            Ok(())
        }
    }

    struct AlwaysFailsDestination;

    #[async_trait]
    impl ReplicationDestination for AlwaysFailsDestination {
        fn name(&self) -> &str {
            "always-fails"
        }

        async fn replicate(&self, _change: &ChangeRecord) -> anyhow::Result<()> {
            anyhow::bail!("destination unreachable")
        }
    }

    fn fake_config() -> DatabaseConfig {
        DatabaseConfig { use_fake: true, connection_string: "s3://k:s@local/bucket/root".to_string(), ..DatabaseConfig::default() }
    }

    fn schema(fields: &[(&str, &str)]) -> BTreeMap<String, FieldSpec> {
        fields.iter().map(|(n, r)| (n.to_string(), FieldSpec::new(*r))).collect()
    }

    #[tokio::test]
    async fn insert_is_replicated_with_full_attributes() {
        let db = Database::new(fake_config());
        db.connect().await.unwrap();
        db.create_resource(ResourceInit::new("orders", schema(&[("status", "string|required")]))).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let destination = Arc::new(RecordingDestination { seen: seen.clone() });
        let plugin = ReplicatorPlugin::new(vec![destination]);
        db.use_plugin(plugin.clone()).await.unwrap();

        let resource = db.resource("orders").unwrap();
        resource
            .insert([("status".to_string(), AttributeValue::Str("new".into()))].into_iter().collect(), Some("o1".into()), None, None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let changes = seen.lock();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].op, "insert");
        assert_eq!(changes[0].record_id, "o1");
        assert_eq!(changes[0].attributes.get("status"), Some(&AttributeValue::Str("new".into())));
    }

    #[tokio::test]
    async fn reads_are_not_replicated() {
        let db = Database::new(fake_config());
        db.connect().await.unwrap();
        db.create_resource(ResourceInit::new("orders", schema(&[("status", "string|required")]))).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let destination = Arc::new(RecordingDestination { seen: seen.clone() });
        let plugin = ReplicatorPlugin::new(vec![destination]);
        db.use_plugin(plugin.clone()).await.unwrap();

        let resource = db.resource("orders").unwrap();
        resource
            .insert([("status".to_string(), AttributeValue::Str("new".into()))].into_iter().collect(), Some("o1".into()), None, None)
            .await
            .unwrap();
        resource.get("o1", None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn a_failing_destination_does_not_block_the_write() {
        let db = Database::new(fake_config());
        db.connect().await.unwrap();
        db.create_resource(ResourceInit::new("orders", schema(&[("status", "string|required")]))).await.unwrap();

        let plugin = ReplicatorPlugin::with_retry(vec![Arc::new(AlwaysFailsDestination)], 2, Duration::from_millis(1));
        db.use_plugin(plugin).await.unwrap();

        let resource = db.resource("orders").unwrap();
        let record = resource
            .insert([("status".to_string(), AttributeValue::Str("new".into()))].into_iter().collect(), Some("o1".into()), None, None)
            .await
            .unwrap();
        assert_eq!(record.id, "o1");
    }
}
