//! The `s3db.json` manifest (spec §6.1): the single object recording every
//! resource's schema history and every registered plugin's persisted state.
//! Read at `connect`, rewritten on `createResource`/`dropResource`/schema
//! evolution/plugin registration, always under an `ifMatch` precondition on
//! the previous etag so concurrent writers serialize through the store
//! rather than through an in-process lock (spec §5, §4.6).

use std::collections::BTreeMap;

use objectdb_client::{ObjectClient, PutOptions};
use objectdb_errors::{ErrorContext, ObjectDbError, ObjectDbResult};
use objectdb_partition::PartitionDef;
use objectdb_schema::{FieldSpec, SchemaVersion};
use serde::{Deserialize, Serialize};

pub const MANIFEST_KEY: &str = "s3db.json";
const MANIFEST_VERSION: u32 = 1;

/// One persisted schema version inside a `resourceSpec` (spec §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaVersionSpec {
    pub attributes: BTreeMap<String, FieldSpec>,
}

/// `resourceSpec` (spec §6.1): every schema version a resource has ever had,
/// its current version, its behavior, and its declared partitions.
///
/// `current_version`/`versions` are keyed by the `"v<N>"` string form rather
/// than [`SchemaVersion`] directly: JSON object keys are strings, and this
/// keeps `s3db.json` readable (`"v0"`, `"v1"`, ...) instead of bare integers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub current_version: String,
    pub versions: BTreeMap<String, SchemaVersionSpec>,
    pub behavior: String,
    #[serde(default)]
    pub partitions: Vec<PartitionDef>,
}

impl ResourceSpec {
    pub fn current_version(&self) -> Option<SchemaVersion> {
        SchemaVersion::parse(&self.current_version)
    }

    pub fn version(&self, version: SchemaVersion) -> Option<&SchemaVersionSpec> {
        self.versions.get(&version.to_string())
    }
}

/// `pluginState` (spec §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginState {
    pub id: String,
    pub class_name: String,
    pub enabled: bool,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// The manifest document itself. Readers must tolerate unknown top-level
/// keys (forward compatibility) — `serde(flatten)` into an `extra` bag
/// achieves that without the engine ever round-tripping data it doesn't
/// understand into the wrong field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceSpec>,
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginState>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self { version: MANIFEST_VERSION, resources: BTreeMap::new(), plugins: BTreeMap::new(), extra: serde_json::Map::new() }
    }
}

/// A loaded manifest plus the etag it was loaded with (`None` if the
/// manifest did not yet exist, in which case a write must use
/// `ifMatch: "*"` rather than the etag of a prior version).
pub struct LoadedManifest {
    pub manifest: Manifest,
    pub etag: Option<String>,
}

/// Loads `<root>/s3db.json`, or returns a fresh, unpersisted manifest if the
/// object does not yet exist (spec §4.6 step 1).
pub async fn load(client: &dyn ObjectClient) -> ObjectDbResult<LoadedManifest> {
    match client.get_object(MANIFEST_KEY).await {
        Ok(fetched) => {
            let manifest: Manifest = serde_json::from_slice(&fetched.body).map_err(|err| ObjectDbError::StoreRejected {
                message: format!("manifest is not valid JSON: {err}"),
                context: ErrorContext::new(),
            })?;
            Ok(LoadedManifest { manifest, etag: Some(fetched.etag) })
        }
        Err(ObjectDbError::NotFound { .. }) => Ok(LoadedManifest { manifest: Manifest::default(), etag: None }),
        Err(err) => Err(err),
    }
}

/// Writes `manifest` with an `ifMatch` precondition on `expected_etag`
/// (`Some("*")`-style "must not exist" when `expected_etag` is `None`).
/// Returns the new etag on success; a precondition failure must be handled
/// by the caller re-loading and retrying (spec §4.6, §5 "optimistic
/// concurrency, bounded attempts, capped backoff").
pub async fn save(client: &dyn ObjectClient, manifest: &Manifest, expected_etag: Option<&str>) -> ObjectDbResult<String> {
    let body = serde_json::to_vec_pretty(manifest).map_err(|err| ObjectDbError::StoreRejected {
        message: format!("failed to serialize manifest: {err}"),
        context: ErrorContext::new(),
    })?;
    let if_match = Some(expected_etag.map(str::to_string).unwrap_or_else(|| "*".to_string()));
    let result = client
        .put_object(MANIFEST_KEY, body, std::collections::HashMap::new(), PutOptions { if_match, content_type: Some("application/json".to_string()) })
        .await?;
    Ok(result.etag)
}
