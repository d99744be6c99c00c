//! `Database`: the top-level orchestration object (spec §4.6). Grounded on
//! the teacher's `AerolithsDB` orchestration struct (`aerolithdb-core/src/lib.rs`)
//! — an owning registry over subsystems, instantiated once and driven
//! through an explicit `connect`/`disconnect` lifecycle — generalized from a
//! fixed set of storage/consensus/security subsystems to a manifest-backed
//! resource registry plus a pluggable extension framework.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use objectdb_client::ObjectClient;
use objectdb_codec::Behavior;
use objectdb_cost::CostAccountant;
use objectdb_errors::{ErrorContext, ObjectDbError, ObjectDbResult};
use objectdb_events::EventBus;
use objectdb_partition::PartitionDef;
use objectdb_plugins::{ObjectDbPlugin, PluginHost, PluginManager, PluginStorage};
use objectdb_resource::{Hook, HookPhase, Resource, ResourceConfig};
use objectdb_schema::{Schema, SchemaDef, SchemaVersion};
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::manifest::{self, Manifest, PluginState, ResourceSpec, SchemaVersionSpec};

/// Input to [`Database::create_resource`]: everything `resourceSpec` needs
/// that isn't derived (current version always starts at `v0`).
#[derive(Debug, Clone)]
pub struct ResourceInit {
    pub name: String,
    pub attributes: SchemaDef,
    pub behavior: Behavior,
    pub partitions: Vec<PartitionDef>,
}

impl ResourceInit {
    pub fn new(name: impl Into<String>, attributes: SchemaDef) -> Self {
        Self { name: name.into(), attributes, behavior: Behavior::default(), partitions: Vec::new() }
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_partitions(mut self, partitions: Vec<PartitionDef>) -> Self {
        self.partitions = partitions;
        self
    }
}

/// Registered `(resourceNamePattern, phase, hook)` awaiting a matching
/// resource, plus applied eagerly to every resource that already exists at
/// registration time. `"*"` matches every resource, current and future
/// (spec §4.7 `hookResource`).
type PendingHook = (String, HookPhase, Hook);

pub struct Database {
    config: DatabaseConfig,
    client: RwLock<Option<Arc<dyn ObjectClient>>>,
    cost: Arc<CostAccountant>,
    events: EventBus,
    resources: RwLock<HashMap<String, Arc<Resource>>>,
    plugin_manager: Arc<PluginManager>,
    manifest: RwLock<Manifest>,
    manifest_etag: RwLock<Option<String>>,
    resource_hooks: RwLock<Vec<PendingHook>>,
    connected: AtomicBool,
}

impl Database {
    /// Constructs an unconnected `Database`. Plugins may be registered via
    /// [`Database::use_plugin`] before or after [`Database::connect`]; the
    /// object store is not touched until `connect` runs.
    pub fn new(config: DatabaseConfig) -> Arc<Self> {
        let cost = Arc::new(CostAccountant::new(config.pricing.clone()));
        Arc::new(Self {
            config,
            client: RwLock::new(None),
            cost,
            events: EventBus::new(),
            resources: RwLock::new(HashMap::new()),
            plugin_manager: Arc::new(PluginManager::new()),
            manifest: RwLock::new(Manifest::default()),
            manifest_etag: RwLock::new(None),
            resource_hooks: RwLock::new(Vec::new()),
            connected: AtomicBool::new(false),
        })
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    pub fn cost(&self) -> Arc<CostAccountant> {
        self.cost.clone()
    }

    fn client(&self) -> Arc<dyn ObjectClient> {
        self.client.read().clone().expect("Database::connect must run before any store-backed operation")
    }

    fn encryption_key(&self) -> Vec<u8> {
        self.config.encryption_key.as_bytes().to_vec()
    }

    /// Loads (or initializes) `s3db.json`, instantiates every
    /// manifest-recorded resource, and runs `setup` then `start` on every
    /// plugin registered so far, in dependency order (spec §4.6).
    pub async fn connect(self: &Arc<Self>) -> ObjectDbResult<()> {
        let client = objectdb_client::connect(
            &self.config.connection_string,
            self.config.use_fake,
            self.cost.clone(),
            self.config.concurrency_cap,
        )
        .await?;
        *self.client.write() = Some(client.clone());

        let loaded = manifest::load(&*client).await?;
        info!(resources = loaded.manifest.resources.len(), plugins = loaded.manifest.plugins.len(), "manifest loaded");

        for (name, spec) in loaded.manifest.resources.iter() {
            let resource = self.instantiate_resource(client.clone(), name, spec)?;
            self.resources.write().insert(name.clone(), resource);
        }

        *self.manifest.write() = loaded.manifest;
        *self.manifest_etag.write() = loaded.etag;

        self.connected.store(true, Ordering::SeqCst);

        let host: Arc<dyn PluginHost> = self.clone();
        self.plugin_manager.setup_and_start_all(host).await.map_err(|err| ObjectDbError::PluginSetupFailed {
            plugin_id: "<topology>".to_string(),
            message: err.to_string(),
        })?;

        Ok(())
    }

    /// Stops every running plugin, in reverse dependency order. The
    /// `Database` itself remains usable afterward (resources still answer
    /// reads/writes); only plugin lifecycles are torn down.
    pub async fn disconnect(self: &Arc<Self>) -> ObjectDbResult<()> {
        self.plugin_manager.stop_all().await.map_err(|err| ObjectDbError::PluginSetupFailed {
            plugin_id: "<topology>".to_string(),
            message: err.to_string(),
        })?;
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn instantiate_resource(&self, client: Arc<dyn ObjectClient>, name: &str, spec: &ResourceSpec) -> ObjectDbResult<Arc<Resource>> {
        let behavior = Behavior::parse(&spec.behavior).unwrap_or_default();
        let config = ResourceConfig::new(name)
            .with_behavior(behavior)
            .with_partitions(spec.partitions.clone());

        let v0 = spec.version(SchemaVersion::initial()).ok_or_else(|| ObjectDbError::SchemaVersionMissing {
            version: "v0".to_string(),
            context: ErrorContext::new().with_resource(name),
        })?;

        let resource = Resource::new(client, self.events.clone(), self.encryption_key(), config, &v0.attributes)
            .map_err(|err| ObjectDbError::StoreRejected { message: err.to_string(), context: ErrorContext::new().with_resource(name) })?;

        let current_version = SchemaVersion::parse(&spec.current_version).ok_or_else(|| ObjectDbError::SchemaVersionMissing {
            version: spec.current_version.clone(),
            context: ErrorContext::new().with_resource(name),
        })?;

        let mut history = BTreeMap::new();
        for (raw_version, version_spec) in &spec.versions {
            let version = SchemaVersion::parse(raw_version).ok_or_else(|| ObjectDbError::SchemaVersionMissing {
                version: raw_version.clone(),
                context: ErrorContext::new().with_resource(name),
            })?;
            let schema = Schema::compile(version, &version_spec.attributes)
                .map_err(|err| ObjectDbError::StoreRejected { message: err.to_string(), context: ErrorContext::new().with_resource(name) })?;
            history.insert(version, schema);
        }
        resource.load_schema_history(history, current_version);

        let resource = Arc::new(resource);
        self.apply_pending_hooks(name, &resource);
        Ok(resource)
    }

    fn apply_pending_hooks(&self, name: &str, resource: &Resource) {
        for (pattern, phase, hook) in self.resource_hooks.read().iter() {
            if pattern == "*" || pattern == name {
                resource.hooks().register(*phase, "*", hook.clone());
            }
        }
    }

    /// Creates a resource at schema `v0` and persists a new manifest entry
    /// for it (spec §4.6 `createResource`).
    pub async fn create_resource(self: &Arc<Self>, init: ResourceInit) -> ObjectDbResult<Arc<Resource>> {
        if self.resources.read().contains_key(&init.name) {
            return Err(ObjectDbError::AlreadyExists { context: ErrorContext::new().with_resource(&init.name) });
        }

        let config = ResourceConfig::new(&init.name).with_behavior(init.behavior).with_partitions(init.partitions.clone());
        let resource = Resource::new(self.client(), self.events.clone(), self.encryption_key(), config, &init.attributes)
            .map_err(|err| ObjectDbError::ValidationFailed(vec![objectdb_errors::FieldError {
                field: "<schema>".to_string(),
                message: err.to_string(),
                expected: "valid rule vocabulary".to_string(),
                actual: "invalid schema".to_string(),
            }]))?;

        let resource = Arc::new(resource);
        self.apply_pending_hooks(&init.name, &resource);

        let name = init.name.clone();
        let attributes = init.attributes.clone();
        let behavior_str = init.behavior.as_str().to_string();
        let partitions = init.partitions.clone();
        self.mutate_manifest(move |manifest| {
            let mut versions = BTreeMap::new();
            versions.insert(SchemaVersion::initial().to_string(), SchemaVersionSpec { attributes: attributes.clone() });
            manifest.resources.insert(
                name.clone(),
                ResourceSpec {
                    current_version: SchemaVersion::initial().to_string(),
                    versions,
                    behavior: behavior_str.clone(),
                    partitions: partitions.clone(),
                },
            );
        })
        .await?;

        self.resources.write().insert(init.name.clone(), resource.clone());
        Ok(resource)
    }

    pub fn resource(&self, name: &str) -> Option<Arc<Resource>> {
        self.resources.read().get(name).cloned()
    }

    /// Registered plugins and their lifecycle metadata, for introspection
    /// (`objectdb-cli plugins list`). Registration order is irrelevant; this
    /// is not the dependency-resolved startup order.
    pub fn plugins(&self) -> Vec<objectdb_plugins::PluginMetadata> {
        self.plugin_manager.metadata()
    }

    /// Removes `name` from the registry and the manifest. Primary/pointer
    /// objects under `resource=<name>/...` are left in place unless
    /// `purge_data` is set (spec §3 "Resource ... Destroyed only through
    /// explicit dropResource (data preserved by default)").
    pub async fn drop_resource(&self, name: &str, purge_data: bool) -> ObjectDbResult<()> {
        if self.resources.write().remove(name).is_none() {
            return Err(ObjectDbError::NotFound { context: ErrorContext::new().with_resource(name) });
        }

        let owned_name = name.to_string();
        self.mutate_manifest(move |manifest| {
            manifest.resources.remove(&owned_name);
        })
        .await?;

        if purge_data {
            self.purge_resource_data(name).await?;
        }
        Ok(())
    }

    async fn purge_resource_data(&self, name: &str) -> ObjectDbResult<()> {
        let client = self.client();
        let prefix = format!("resource={name}/");
        let mut token = None;
        loop {
            let page = client
                .list_objects(&prefix, objectdb_client::ListOptions { continuation_token: token.clone(), page_size: Some(1000) })
                .await?;
            let keys: Vec<String> = page.keys.iter().map(|e| e.key.clone()).collect();
            if !keys.is_empty() {
                client.delete_objects(&keys).await?;
            }
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(())
    }

    /// `updateAttributes` (spec §4.3/§4.6): compiles the next schema
    /// version on the live `Resource` and appends it to the manifest.
    /// Existing objects are never rewritten.
    pub async fn update_attributes(&self, resource_name: &str, fields: SchemaDef) -> ObjectDbResult<SchemaVersion> {
        let resource = self.resource(resource_name).ok_or_else(|| ObjectDbError::NotFound {
            context: ErrorContext::new().with_resource(resource_name),
        })?;
        let next_version = resource
            .update_attributes(&fields)
            .map_err(|err| ObjectDbError::ValidationFailed(vec![objectdb_errors::FieldError {
                field: "<schema>".to_string(),
                message: err.to_string(),
                expected: "valid rule vocabulary".to_string(),
                actual: "invalid schema".to_string(),
            }]))?;

        let name = resource_name.to_string();
        let fields = fields.clone();
        self.mutate_manifest(move |manifest| {
            if let Some(spec) = manifest.resources.get_mut(&name) {
                spec.versions.insert(next_version.to_string(), SchemaVersionSpec { attributes: fields.clone() });
                spec.current_version = next_version.to_string();
            }
        })
        .await?;

        Ok(next_version)
    }

    /// Registers `plugin` and runs its lifecycle. If the database is already
    /// connected, `setup` then `start` run immediately; otherwise they run
    /// as part of the next `connect` (spec §4.6 "A plugin added after
    /// connect still receives setup then start.").
    pub async fn use_plugin(self: &Arc<Self>, plugin: Arc<dyn ObjectDbPlugin>) -> ObjectDbResult<()> {
        let metadata = plugin.metadata();
        self.plugin_manager.register(plugin).map_err(|err| ObjectDbError::PluginSetupFailed {
            plugin_id: metadata.id.clone(),
            message: err.to_string(),
        })?;

        self.mutate_manifest({
            let id = metadata.id.clone();
            move |manifest| {
                manifest.plugins.entry(id.clone()).or_insert_with(|| PluginState {
                    id: id.clone(),
                    class_name: id.clone(),
                    enabled: true,
                    config: serde_json::Value::Null,
                });
            }
        })
        .await?;

        if self.connected.load(Ordering::SeqCst) {
            let host: Arc<dyn PluginHost> = self.clone();
            self.plugin_manager.setup_and_start_one(&metadata.id, host).await;
        }
        Ok(())
    }

    /// Applies `mutate` to an in-memory clone of the manifest and persists
    /// it under an `ifMatch` precondition, retrying with a freshly reloaded
    /// manifest on precondition failure (spec §5 "optimistic concurrency,
    /// bounded attempts, capped backoff").
    async fn mutate_manifest(&self, mutate: impl Fn(&mut Manifest) + Send + Sync) -> ObjectDbResult<()> {
        let client = self.client();
        let retry = self.config.retry.clone();

        for attempt in 0..retry.max_attempts {
            let (mut candidate, expected_etag) = {
                let manifest = self.manifest.read();
                (manifest.clone(), self.manifest_etag.read().clone())
            };
            mutate(&mut candidate);

            match manifest::save(&*client, &candidate, expected_etag.as_deref()).await {
                Ok(new_etag) => {
                    *self.manifest.write() = candidate;
                    *self.manifest_etag.write() = Some(new_etag);
                    return Ok(());
                }
                Err(ObjectDbError::AlreadyExists { .. }) | Err(ObjectDbError::StoreRejected { .. }) => {
                    warn!(attempt, "manifest write precondition failed, reloading and retrying");
                    let reloaded = manifest::load(&*client).await?;
                    *self.manifest.write() = reloaded.manifest;
                    *self.manifest_etag.write() = reloaded.etag;
                    tokio::time::sleep(retry.backoff_for(attempt)).await;
                }
                Err(err) => return Err(err),
            }
        }

        Err(ObjectDbError::StoreUnavailable {
            message: "manifest write did not converge after retry budget".to_string(),
            context: ErrorContext::new(),
            source: None,
        })
    }
}

impl PluginHost for Database {
    fn hook_resource(&self, resource_name: &str, phase: HookPhase, hook: Hook) {
        {
            let resources = self.resources.read();
            for (name, resource) in resources.iter() {
                if resource_name == "*" || resource_name == name {
                    resource.hooks().register(phase, "*", hook.clone());
                }
            }
        }
        self.resource_hooks.write().push((resource_name.to_string(), phase, hook));
    }

    fn events(&self) -> EventBus {
        self.events.clone()
    }

    fn plugin_storage(&self, plugin_id: &str) -> PluginStorage {
        PluginStorage::new(self.client(), plugin_id)
    }
}
