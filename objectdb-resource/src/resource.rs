//! The Resource operation pipeline (spec §4.5): the unit of schema +
//! behavior + hooks over a logical collection. Every caller-visible CRUD
//! operation traverses the pipeline named in the module-level doc below.
//!
//! Write pipeline: `coerce -> validate -> beforeHooks -> encode -> encrypt ->
//! storeWrite -> updatePartitionPointers -> afterHooks -> emitEvent`.
//! Read pipeline: `storeRead -> decodeHeader(_v) -> resolveSchemaVersion ->
//! decrypt -> decode -> afterReadHooks`.
//!
//! Every operation below accepts an optional deadline, threaded through as
//! an `OpContext` and checked at each suspension point (spec §9: cancellation
//! is an explicit deadline check, never a dropped future).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use objectdb_client::{GetResult, ListOptions, ObjectClient, PutOptions};
use objectdb_codec::{decode_record, encode_record, Behavior};
use objectdb_errors::{ErrorContext, ObjectDbError, ObjectDbResult};
use objectdb_events::{EventBus, ResourceEvent, ResourcePhase};
use objectdb_partition::{unknown_partition, PartitionDef, PartitionIndex};
use objectdb_schema::{AttributeMap, Schema, SchemaDef, SchemaVersion, ValidationReport};
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::warn;

use crate::cache::{CacheLookup, SingleFlightCache};
use crate::context::{with_deadline, OpContext};
use crate::filter::Filter;
use crate::hooks::{run_after, run_before, HookRegistry};
use crate::record::{generate_id, Record};

const VERSION_KEY: &str = "_v";
const CREATED_AT_KEY: &str = "_created_at";
const UPDATED_AT_KEY: &str = "_updated_at";

const DEFAULT_METADATA_BUDGET_BYTES: usize = 2000;
const DEFAULT_COMPRESSION_THRESHOLD_BYTES: usize = 10 * 1024;
const DEFAULT_LIST_BATCH_CONCURRENCY: usize = 16;

/// Everything needed to stand up a resource beyond its initial schema: name,
/// storage behavior, declared partitions, and the codec's size thresholds.
#[derive(Clone)]
pub struct ResourceConfig {
    pub name: String,
    pub behavior: Behavior,
    pub partitions: Vec<PartitionDef>,
    pub metadata_budget_bytes: usize,
    pub compression_threshold_bytes: usize,
}

impl ResourceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behavior: Behavior::default(),
            partitions: Vec::new(),
            metadata_budget_bytes: DEFAULT_METADATA_BUDGET_BYTES,
            compression_threshold_bytes: DEFAULT_COMPRESSION_THRESHOLD_BYTES,
        }
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

fn to_error_fields(report: ValidationReport) -> Vec<objectdb_errors::FieldError> {
    report
        .errors
        .into_iter()
        .map(|e| objectdb_errors::FieldError { field: e.field, message: e.message, expected: e.expected, actual: e.actual })
        .collect()
}

/// Created via `Database::createResource`, mutated only through
/// `update_attributes` (new schema version; never rewrites existing
/// objects), destroyed only through explicit `Database::dropResource`.
pub struct Resource {
    pub name: String,
    client: Arc<dyn ObjectClient>,
    partition_index: PartitionIndex,
    partitions: Vec<PartitionDef>,
    behavior: Behavior,
    schemas: RwLock<BTreeMap<SchemaVersion, Schema>>,
    current_version: RwLock<SchemaVersion>,
    hooks: HookRegistry,
    events: EventBus,
    cache: SingleFlightCache,
    encryption_key: Vec<u8>,
    metadata_budget: usize,
    compression_threshold: usize,
}

impl Resource {
    /// Creates a resource at schema `v0`, compiled from `initial_schema`.
    pub fn new(
        client: Arc<dyn ObjectClient>,
        events: EventBus,
        encryption_key: Vec<u8>,
        config: ResourceConfig,
        initial_schema: &SchemaDef,
    ) -> Result<Self, objectdb_schema::SchemaError> {
        let schema = Schema::compile(SchemaVersion::initial(), initial_schema)?;
        let mut schemas = BTreeMap::new();
        schemas.insert(SchemaVersion::initial(), schema);
        Ok(Self {
            name: config.name,
            partition_index: PartitionIndex::new(client.clone()),
            client,
            partitions: config.partitions,
            behavior: config.behavior,
            schemas: RwLock::new(schemas),
            current_version: RwLock::new(SchemaVersion::initial()),
            hooks: HookRegistry::new(),
            events,
            cache: SingleFlightCache::new(),
            encryption_key,
            metadata_budget: config.metadata_budget_bytes,
            compression_threshold: config.compression_threshold_bytes,
        })
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn partitions(&self) -> &[PartitionDef] {
        &self.partitions
    }

    pub fn current_version(&self) -> SchemaVersion {
        *self.current_version.read()
    }

    pub fn current_schema(&self) -> Schema {
        let version = self.current_version();
        self.schemas.read().get(&version).cloned().expect("current_version always has a compiled schema")
    }

    fn schema_for_version(&self, version: SchemaVersion) -> ObjectDbResult<Schema> {
        self.schemas.read().get(&version).cloned().ok_or_else(|| ObjectDbError::SchemaVersionMissing {
            version: version.to_string(),
            context: ErrorContext::new().with_resource(&self.name),
        })
    }

    /// Registers all historically compiled schemas in one shot, used by
    /// `Database::connect` when rehydrating a resource from its manifest
    /// entry. `version` becomes the new current version.
    pub fn load_schema_history(&self, history: BTreeMap<SchemaVersion, Schema>, version: SchemaVersion) {
        *self.schemas.write() = history;
        *self.current_version.write() = version;
    }

    /// Compiles `fields` as the next schema version (`updateAttributes`,
    /// spec §4.3). Old versions remain resolvable; existing objects are
    /// never rewritten.
    pub fn update_attributes(&self, fields: &SchemaDef) -> Result<SchemaVersion, objectdb_schema::SchemaError> {
        let next_version = self.current_version().next();
        let schema = Schema::compile(next_version, fields)?;
        let diff = schema.diff(&self.current_schema());
        tracing::info!(resource = %self.name, version = %next_version, added = ?diff.added, removed = ?diff.removed, retyped = ?diff.retyped, "schema evolved");
        self.schemas.write().insert(next_version, schema);
        *self.current_version.write() = next_version;
        Ok(next_version)
    }

    fn data_key(&self, id: &str) -> String {
        format!("resource={}/data/id={id}", self.name)
    }

    fn data_prefix(&self) -> String {
        format!("resource={}/data/id=", self.name)
    }

    fn ctx(&self, op: &str, deadline: Option<Instant>) -> OpContext {
        OpContext::new(self.name.clone(), op).with_deadline_opt(deadline)
    }

    fn emit(&self, phase: ResourcePhase, op: &str, payload: serde_json::Value) {
        let event = ResourceEvent { resource: self.name.clone(), phase, op: op.to_string() };
        self.events.emit(event.name(), payload);
    }

    /// Builds the `after`-phase payload spec §8 S6 requires: the full
    /// decoded record (not just its id) alongside the resource name and op,
    /// so a bus subscriber never needs to fall back to a hook registration
    /// to see what changed.
    fn record_event_payload(&self, op: &str, record: &Record) -> serde_json::Value {
        let attributes: serde_json::Map<String, serde_json::Value> =
            record.attributes.iter().map(|(k, v)| (k.clone(), serde_json::Value::from(v))).collect();
        serde_json::json!({
            "resourceName": self.name,
            "op": op,
            "record": {
                "id": record.id,
                "attributes": attributes,
                "_v": record.version.to_string(),
                "_createdAt": record.created_at.to_rfc3339(),
                "_updatedAt": record.updated_at.to_rfc3339(),
            },
        })
    }

    async fn emit_hook_failures(&self, op: &str, errors: Vec<ObjectDbError>) {
        if errors.is_empty() {
            return;
        }
        for error in &errors {
            warn!(resource = %self.name, op, error = %error, "after hook failed");
        }
        self.emit(ResourcePhase::OnError, op, serde_json::json!({ "hookFailures": errors.len() }));
    }

    fn envelope_metadata(&self, version: SchemaVersion, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert(VERSION_KEY.to_string(), version.to_string());
        m.insert(CREATED_AT_KEY.to_string(), created_at.to_rfc3339());
        m.insert(UPDATED_AT_KEY.to_string(), updated_at.to_rfc3339());
        m
    }

    fn parse_envelope(&self, metadata: &HashMap<String, String>) -> ObjectDbResult<(SchemaVersion, DateTime<Utc>, DateTime<Utc>)> {
        let raw_version = metadata.get(VERSION_KEY).ok_or_else(|| ObjectDbError::SchemaVersionMissing {
            version: "<missing>".to_string(),
            context: ErrorContext::new().with_resource(&self.name),
        })?;
        let version = SchemaVersion::parse(raw_version).ok_or_else(|| ObjectDbError::SchemaVersionMissing {
            version: raw_version.clone(),
            context: ErrorContext::new().with_resource(&self.name),
        })?;
        let created_at = metadata
            .get(CREATED_AT_KEY)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let updated_at = metadata
            .get(UPDATED_AT_KEY)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(created_at);
        Ok((version, created_at, updated_at))
    }

    /// `storeRead -> decodeHeader(_v) -> resolveSchemaVersion -> decrypt ->
    /// decode` for one already-fetched object.
    fn decode_fetched(&self, id: &str, fetched: GetResult) -> ObjectDbResult<Record> {
        let (version, created_at, updated_at) = self.parse_envelope(&fetched.metadata)?;
        let schema = self.schema_for_version(version)?;
        let decoded = decode_record(&schema, self.behavior, &fetched.metadata, &fetched.body, &self.encryption_key)?;
        Ok(Record { id: id.to_string(), attributes: decoded.attributes, version, created_at, updated_at })
    }

    async fn fetch_and_decode(&self, id: &str, deadline: Option<Instant>) -> ObjectDbResult<Record> {
        let ctx = self.ctx("get", deadline);
        let fetched = with_deadline(&ctx, async { self.client.get_object(&self.data_key(id)).await }).await?;
        self.decode_fetched(id, fetched)
    }

    /// Used by [`crate::stream::StreamingIterator`], which lives outside
    /// this module but needs the same decode path `get`/`list` use.
    pub(crate) async fn fetch_and_decode_pub(&self, id: &str) -> ObjectDbResult<Record> {
        self.fetch_and_decode(id, None).await
    }

    pub(crate) async fn client_list(&self, prefix: &str, options: ListOptions) -> ObjectDbResult<objectdb_client::ListPage> {
        self.client.list_objects(prefix, options).await
    }

    // ---- insert / insert_overwrite --------------------------------------

    async fn insert_with_precondition(
        &self,
        attributes: AttributeMap,
        id: Option<String>,
        user_payload: Option<Vec<u8>>,
        enforce_new: bool,
        deadline: Option<Instant>,
    ) -> ObjectDbResult<Record> {
        if let Some(id) = &id {
            if id.is_empty() {
                return Err(ObjectDbError::ValidationFailed(vec![objectdb_errors::FieldError {
                    field: "id".to_string(),
                    message: "id must not be an empty string".to_string(),
                    expected: "non-empty string".to_string(),
                    actual: "\"\"".to_string(),
                }]));
            }
        }

        let schema = self.current_schema();
        if schema.fields.is_empty() && !attributes.is_empty() {
            return Err(ObjectDbError::ValidationFailed(vec![objectdb_errors::FieldError {
                field: "<schema>".to_string(),
                message: "resource has no declared attributes; only an empty insert is accepted".to_string(),
                expected: "empty attribute map".to_string(),
                actual: format!("{} attribute(s)", attributes.len()),
            }]));
        }
        let coerced = schema.coerce(&attributes);
        let validated = schema.validate(&coerced).map_err(|report| ObjectDbError::ValidationFailed(to_error_fields(report)))?;

        let id = id.unwrap_or_else(generate_id);
        let now = Utc::now();
        let mut record =
            Record { id: id.clone(), attributes: validated.into_inner(), version: schema.version, created_at: now, updated_at: now };

        let ctx = self.ctx("insert", deadline);
        record = run_before(&self.hooks, &ctx, "insert", record).await?;

        let encoded = encode_record(
            &schema,
            self.behavior,
            &record.attributes,
            &self.encryption_key,
            self.metadata_budget,
            self.compression_threshold,
            user_payload.as_deref(),
        )?;
        let mut metadata = encoded.metadata;
        metadata.extend(self.envelope_metadata(schema.version, record.created_at, record.updated_at));

        let options =
            if enforce_new { PutOptions { if_match: Some("*".to_string()), content_type: None } } else { PutOptions::default() };
        with_deadline(&ctx, async { self.client.put_object(&self.data_key(&id), encoded.body, metadata, options).await }).await?;

        self.partition_index.write_pointers(&self.name, &self.partitions, &id, &record.attributes).await?;

        let (after_record, hook_errors) = run_after(&self.hooks, &ctx, "insert", record).await;
        self.emit_hook_failures("insert", hook_errors).await;
        self.emit(ResourcePhase::After, "insert", self.record_event_payload("insert", &after_record));
        Ok(after_record)
    }

    /// Fails with `AlreadyExists` if `id` already has a primary object
    /// (default collision policy — SPEC_FULL.md §9 Open Question decision).
    pub async fn insert(
        &self,
        attributes: AttributeMap,
        id: Option<String>,
        user_payload: Option<Vec<u8>>,
        deadline: Option<Instant>,
    ) -> ObjectDbResult<Record> {
        self.insert_with_precondition(attributes, id, user_payload, true, deadline).await
    }

    /// Last-writer-wins escape hatch: silently overwrites an existing
    /// primary object instead of failing with `AlreadyExists`.
    pub async fn insert_overwrite(
        &self,
        attributes: AttributeMap,
        id: Option<String>,
        user_payload: Option<Vec<u8>>,
        deadline: Option<Instant>,
    ) -> ObjectDbResult<Record> {
        self.insert_with_precondition(attributes, id, user_payload, false, deadline).await
    }

    // ---- get / exists -----------------------------------------------------

    pub async fn get(&self, id: &str, deadline: Option<Instant>) -> ObjectDbResult<Record> {
        match self.cache.get_or_claim(id).await {
            CacheLookup::Hit(record) => return Ok(record),
            CacheLookup::Miss => {}
        }

        let result = self.fetch_and_decode(id, deadline).await;
        match result {
            Ok(record) => {
                let ctx = self.ctx("get", deadline);
                let (record, hook_errors) = run_after(&self.hooks, &ctx, "get", record).await;
                self.emit_hook_failures("get", hook_errors).await;
                self.cache.complete(id, record.clone());
                Ok(record)
            }
            Err(err) => {
                self.cache.fail(id);
                Err(err)
            }
        }
    }

    pub async fn exists(&self, id: &str, deadline: Option<Instant>) -> ObjectDbResult<bool> {
        let ctx = self.ctx("exists", deadline);
        match with_deadline(&ctx, async { self.client.head_object(&self.data_key(id)).await }).await {
            Ok(_) => Ok(true),
            Err(ObjectDbError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    // ---- update / upsert ---------------------------------------------------

    /// Merges `patch` into the current record and re-encodes under the
    /// resource's *current* schema version, even if the stored record was
    /// written under an older one.
    pub async fn update(
        &self,
        id: &str,
        patch: AttributeMap,
        user_payload: Option<Vec<u8>>,
        deadline: Option<Instant>,
    ) -> ObjectDbResult<Record> {
        let old = self.fetch_and_decode(id, deadline).await?;
        let mut merged = old.attributes.clone();
        for (k, v) in patch {
            merged.insert(k, v);
        }
        let record = self.write_current(id, old.attributes, merged, old.created_at, user_payload, "update", deadline).await?;
        self.cache.invalidate(id);
        Ok(record)
    }

    /// Full-map replace; insert-or-update. Preserves the prior `_createdAt`
    /// when a record already existed under `id`.
    pub async fn upsert(
        &self,
        id: &str,
        attributes: AttributeMap,
        user_payload: Option<Vec<u8>>,
        deadline: Option<Instant>,
    ) -> ObjectDbResult<Record> {
        let existing = self.fetch_and_decode(id, deadline).await;
        let (old_attributes, created_at) = match existing {
            Ok(old) => (old.attributes, old.created_at),
            Err(ObjectDbError::NotFound { .. }) => (AttributeMap::new(), Utc::now()),
            Err(err) => return Err(err),
        };
        let record = self.write_current(id, old_attributes, attributes, created_at, user_payload, "upsert", deadline).await?;
        self.cache.invalidate(id);
        Ok(record)
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_current(
        &self,
        id: &str,
        old_attributes: AttributeMap,
        new_attributes: AttributeMap,
        created_at: DateTime<Utc>,
        user_payload: Option<Vec<u8>>,
        op: &str,
        deadline: Option<Instant>,
    ) -> ObjectDbResult<Record> {
        let schema = self.current_schema();
        let coerced = schema.coerce(&new_attributes);
        let validated = schema.validate(&coerced).map_err(|report| ObjectDbError::ValidationFailed(to_error_fields(report)))?;

        let updated_at = Utc::now();
        let mut record =
            Record { id: id.to_string(), attributes: validated.into_inner(), version: schema.version, created_at, updated_at };

        let ctx = self.ctx(op, deadline);
        record = run_before(&self.hooks, &ctx, op, record).await?;

        let encoded = encode_record(
            &schema,
            self.behavior,
            &record.attributes,
            &self.encryption_key,
            self.metadata_budget,
            self.compression_threshold,
            user_payload.as_deref(),
        )?;
        let mut metadata = encoded.metadata;
        metadata.extend(self.envelope_metadata(schema.version, record.created_at, record.updated_at));

        with_deadline(&ctx, async {
            self.client.put_object(&self.data_key(id), encoded.body, metadata, PutOptions::default()).await
        })
        .await?;

        self.reconcile_pointers(id, &old_attributes, &record.attributes).await?;

        let (after_record, hook_errors) = run_after(&self.hooks, &ctx, op, record).await;
        self.emit_hook_failures(op, hook_errors).await;
        self.emit(ResourcePhase::After, op, self.record_event_payload(op, &after_record));
        Ok(after_record)
    }

    /// Rewrites only the pointers whose partition-field projection changed.
    /// Retries once on failure; a second failure is tolerated as a
    /// `PartitionPointerStale` orphan, reclaimed lazily by a later read or
    /// an explicit `PartitionIndex::rebuild`.
    async fn reconcile_pointers(&self, id: &str, old: &AttributeMap, new: &AttributeMap) -> ObjectDbResult<()> {
        let attempt = self.partition_index.rewrite_changed(&self.name, &self.partitions, id, old, new).await;
        match attempt {
            Ok(()) => Ok(()),
            Err(first_err) => {
                warn!(resource = %self.name, record_id = id, error = %first_err, "partition pointer rewrite failed, retrying once");
                match self.partition_index.rewrite_changed(&self.name, &self.partitions, id, old, new).await {
                    Ok(()) => Ok(()),
                    Err(_) => {
                        self.emit(ResourcePhase::OnError, "partition_rewrite", serde_json::json!({ "id": id }));
                        Err(ObjectDbError::PartitionPointerStale {
                            context: ErrorContext::new().with_resource(&self.name).with_record_id(id),
                        })
                    }
                }
            }
        }
    }

    // ---- delete -------------------------------------------------------------

    /// Primary object removed before pointers (invariant 3: a failed
    /// cleanup leaves orphan pointers, never orphan records). Idempotent:
    /// deleting an absent record returns `Ok(false)` without emitting.
    pub async fn delete(&self, id: &str, deadline: Option<Instant>) -> ObjectDbResult<bool> {
        let old = match self.fetch_and_decode(id, deadline).await {
            Ok(record) => record,
            Err(ObjectDbError::NotFound { .. }) => return Ok(false),
            Err(err) => return Err(err),
        };

        let ctx = self.ctx("delete", deadline);
        with_deadline(&ctx, async { self.client.delete_object(&self.data_key(id)).await }).await?;
        self.partition_index.delete_pointers(&self.name, &self.partitions, id, &old.attributes).await?;
        self.cache.invalidate(id);

        self.emit(ResourcePhase::After, "delete", self.record_event_payload("delete", &old));
        Ok(true)
    }

    // ---- list / listByPartition / count / stream -----------------------------

    /// Paginates the resource's primary-object prefix, decodes each entry,
    /// applies `filter` client-side, and returns up to `limit` matches after
    /// skipping the first `offset`.
    pub async fn list(&self, limit: usize, offset: usize, filter: &Filter, deadline: Option<Instant>) -> ObjectDbResult<Vec<Record>> {
        let mut matched = Vec::with_capacity(limit);
        let mut skipped = 0usize;
        let mut token = None;
        loop {
            let page = self
                .client
                .list_objects(&self.data_prefix(), ListOptions { continuation_token: token.clone(), page_size: Some(1000) })
                .await?;
            for entry in &page.keys {
                let Some(id) = entry.key.strip_prefix(&self.data_prefix()) else { continue };
                let record = self.fetch_and_decode(id, deadline).await?;
                if filter.is_empty() || filter.matches(&record.attributes) {
                    if skipped < offset {
                        skipped += 1;
                        continue;
                    }
                    matched.push(record);
                    if matched.len() >= limit {
                        return Ok(matched);
                    }
                }
            }
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(matched)
    }

    pub async fn count(&self) -> ObjectDbResult<usize> {
        let mut total = 0usize;
        let mut token = None;
        loop {
            let page = self
                .client
                .list_objects(&self.data_prefix(), ListOptions { continuation_token: token.clone(), page_size: Some(1000) })
                .await?;
            total += page.keys.len();
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(total)
    }

    /// Batch-fetches records whose partition values match `selector`, fanned
    /// out with bounded concurrency. Requires an `Arc<Resource>` receiver so
    /// the fan-out tasks can outlive the borrow of any single call.
    pub async fn list_by_partition(
        self: &Arc<Self>,
        partition_name: &str,
        selector: HashMap<String, String>,
        deadline: Option<Instant>,
    ) -> ObjectDbResult<Vec<Record>> {
        let partition = self
            .partitions
            .iter()
            .find(|p| p.name == partition_name)
            .ok_or_else(|| unknown_partition(partition_name, &self.name))?;

        let ids = self.partition_index.list(&self.name, partition, &selector).await?;

        let resource = self.clone();
        let outcome = crate::batch::run_batch(ids, DEFAULT_LIST_BATCH_CONCURRENCY, false, move |id: String| {
            let resource = resource.clone();
            Box::pin(async move { resource.get(&id, deadline).await })
        })
        .await;

        if let Some(err) = outcome.failures.into_iter().next() {
            return Err(err);
        }
        Ok(outcome.successes)
    }

    /// Lazy, restartable paginated iteration (spec §4.5 `stream`).
    pub fn stream(self: &Arc<Self>, page_size: u32) -> crate::stream::StreamingIterator {
        crate::stream::StreamingIterator::new(self.clone(), page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objectdb_client::FakeObjectClient;
    use objectdb_cost::CostAccountant;
    use objectdb_schema::{AttributeValue, FieldSpec};

    fn def(fields: &[(&str, &str)]) -> SchemaDef {
        fields.iter().map(|(n, r)| (n.to_string(), FieldSpec::new(*r))).collect()
    }

    fn resource(config: ResourceConfig, schema: &SchemaDef) -> Resource {
        let client: Arc<dyn ObjectClient> = Arc::new(FakeObjectClient::new(Arc::new(CostAccountant::default())));
        Resource::new(client, EventBus::new(), b"test-key".to_vec(), config, schema).unwrap()
    }

    fn attrs(pairs: &[(&str, AttributeValue)]) -> AttributeMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let schema = def(&[("status", "string|required")]);
        let res = resource(ResourceConfig::new("orders"), &schema);
        let record = res.insert(attrs(&[("status", AttributeValue::Str("new".into()))]), None, None, None).await.unwrap();
        let fetched = res.get(&record.id, None).await.unwrap();
        assert_eq!(fetched.attributes, record.attributes);
    }

    #[tokio::test]
    async fn insert_with_duplicate_id_fails_already_exists() {
        let schema = def(&[("status", "string|required")]);
        let res = resource(ResourceConfig::new("orders"), &schema);
        res.insert(attrs(&[("status", AttributeValue::Str("new".into()))]), Some("o1".into()), None, None).await.unwrap();
        let err = res
            .insert(attrs(&[("status", AttributeValue::Str("new".into()))]), Some("o1".into()), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "AlreadyExists");
    }

    #[tokio::test]
    async fn insert_overwrite_replaces_existing_record() {
        let schema = def(&[("status", "string|required")]);
        let res = resource(ResourceConfig::new("orders"), &schema);
        res.insert(attrs(&[("status", AttributeValue::Str("new".into()))]), Some("o1".into()), None, None).await.unwrap();
        let updated = res
            .insert_overwrite(attrs(&[("status", AttributeValue::Str("paid".into()))]), Some("o1".into()), None, None)
            .await
            .unwrap();
        assert_eq!(updated.attributes.get("status"), Some(&AttributeValue::Str("paid".into())));
    }

    #[tokio::test]
    async fn get_missing_record_is_not_found() {
        let schema = def(&[("status", "string|required")]);
        let res = resource(ResourceConfig::new("orders"), &schema);
        let err = res.get("missing", None).await.unwrap_err();
        assert_eq!(err.code(), "NotFound");
    }

    #[tokio::test]
    async fn update_merges_patch_and_bumps_updated_at() {
        let schema = def(&[("status", "string|required"), ("total", "number|required")]);
        let res = resource(ResourceConfig::new("orders"), &schema);
        let record = res
            .insert(
                attrs(&[("status", AttributeValue::Str("new".into())), ("total", AttributeValue::Num(10.0))]),
                None,
                None,
                None,
            )
            .await
            .unwrap();

        let mut patch = AttributeMap::new();
        patch.insert("status".to_string(), AttributeValue::Str("paid".into()));
        let updated = res.update(&record.id, patch, None, None).await.unwrap();

        assert_eq!(updated.attributes.get("status"), Some(&AttributeValue::Str("paid".into())));
        assert_eq!(updated.attributes.get("total"), Some(&AttributeValue::Num(10.0)));
        assert!(updated.updated_at >= record.created_at);
    }

    #[tokio::test]
    async fn upsert_creates_when_absent_and_updates_when_present() {
        let schema = def(&[("status", "string|required")]);
        let res = resource(ResourceConfig::new("orders"), &schema);
        let created = res.upsert("o1", attrs(&[("status", AttributeValue::Str("new".into()))]), None, None).await.unwrap();
        assert_eq!(created.attributes.get("status"), Some(&AttributeValue::Str("new".into())));

        let replaced = res.upsert("o1", attrs(&[("status", AttributeValue::Str("paid".into()))]), None, None).await.unwrap();
        assert_eq!(replaced.created_at, created.created_at);
        assert_eq!(replaced.attributes.get("status"), Some(&AttributeValue::Str("paid".into())));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let schema = def(&[("status", "string|required")]);
        let res = resource(ResourceConfig::new("orders"), &schema);
        let record = res.insert(attrs(&[("status", AttributeValue::Str("new".into()))]), None, None, None).await.unwrap();
        assert!(res.delete(&record.id, None).await.unwrap());
        assert!(!res.delete(&record.id, None).await.unwrap());
        assert_eq!(res.get(&record.id, None).await.unwrap_err().code(), "NotFound");
    }

    #[tokio::test]
    async fn update_rewrites_changed_partition_pointer() {
        let schema = def(&[("status", "string|required")]);
        let partitions = vec![PartitionDef::new("byStatus", vec![("status".to_string(), objectdb_schema::FieldType::String)])];
        let res = Arc::new(resource(ResourceConfig::new("orders").with_partitions(partitions), &schema));
        let record = res.insert(attrs(&[("status", AttributeValue::Str("new".into()))]), None, None, None).await.unwrap();

        let mut patch = AttributeMap::new();
        patch.insert("status".to_string(), AttributeValue::Str("paid".into()));
        res.update(&record.id, patch, None, None).await.unwrap();

        let mut selector = HashMap::new();
        selector.insert("status".to_string(), "paid".to_string());
        let found = res.list_by_partition("byStatus", selector, None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, record.id);
    }

    #[tokio::test]
    async fn list_applies_filter_and_limit() {
        let schema = def(&[("status", "string|required")]);
        let res = resource(ResourceConfig::new("orders"), &schema);
        for status in ["new", "paid", "new"] {
            res.insert(attrs(&[("status", AttributeValue::Str(status.into()))]), None, None, None).await.unwrap();
        }
        let filter = Filter::new().eq("status", AttributeValue::Str("new".into()));
        let matches = res.list(10, 0, &filter, None).await.unwrap();
        assert_eq!(matches.len(), 2);
    }

    #[tokio::test]
    async fn count_reflects_live_records() {
        let schema = def(&[("status", "string|required")]);
        let res = resource(ResourceConfig::new("orders"), &schema);
        res.insert(attrs(&[("status", AttributeValue::Str("new".into()))]), None, None, None).await.unwrap();
        res.insert(attrs(&[("status", AttributeValue::Str("new".into()))]), None, None, None).await.unwrap();
        assert_eq!(res.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unknown_partition_name_is_an_error() {
        let schema = def(&[("status", "string|required")]);
        let res = Arc::new(resource(ResourceConfig::new("orders"), &schema));
        let err = res.list_by_partition("missing", HashMap::new(), None).await.unwrap_err();
        assert_eq!(err.code(), "UnknownPartition");
    }

    #[tokio::test]
    async fn insert_with_empty_string_id_is_validation_failed() {
        let schema = def(&[("status", "string|required")]);
        let res = resource(ResourceConfig::new("orders"), &schema);
        let err = res
            .insert(attrs(&[("status", AttributeValue::Str("new".into()))]), Some(String::new()), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ValidationFailed");
    }

    #[tokio::test]
    async fn insert_into_schemaless_resource_rejects_non_empty_attributes_but_generates_id() {
        let schema = def(&[]);
        let res = resource(ResourceConfig::new("notes"), &schema);
        let err = res.insert(attrs(&[("stray", AttributeValue::Str("x".into()))]), None, None, None).await.unwrap_err();
        assert_eq!(err.code(), "ValidationFailed");

        let record = res.insert(AttributeMap::new(), None, None, None).await.unwrap();
        assert!(!record.id.is_empty());
    }

    #[tokio::test]
    async fn insert_respects_an_already_elapsed_deadline() {
        let schema = def(&[("status", "string|required")]);
        let res = resource(ResourceConfig::new("orders"), &schema);
        let deadline = Instant::now() - std::time::Duration::from_secs(1);
        let err = res
            .insert(attrs(&[("status", AttributeValue::Str("new".into()))]), None, None, Some(deadline))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "Cancelled");
    }

    #[tokio::test]
    async fn get_with_the_wrong_encryption_key_fails_decryption() {
        let schema = def(&[("token", "secret|required")]);
        let client: Arc<dyn ObjectClient> = Arc::new(FakeObjectClient::new(Arc::new(CostAccountant::default())));
        let events = EventBus::new();
        let written_with =
            Resource::new(client.clone(), events.clone(), b"right-key".to_vec(), ResourceConfig::new("secrets"), &schema).unwrap();
        let read_with =
            Resource::new(client, events, b"wrong-key".to_vec(), ResourceConfig::new("secrets"), &schema).unwrap();

        let record = written_with
            .insert(attrs(&[("token", AttributeValue::Str("abc".into()))]), None, None, None)
            .await
            .unwrap();

        let err = read_with.get(&record.id, None).await.unwrap_err();
        assert_eq!(err.code(), "DecryptionFailed");
    }
}
