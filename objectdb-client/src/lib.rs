//! The only component that talks to the object store.
//!
//! `ObjectClient` is a thin, typed wrapper over S3's PUT/GET/HEAD/DELETE/LIST
//! surface. Every implementation reports completed calls to a
//! [`objectdb_cost::CostAccountant`] and never panics on expected outcomes —
//! *not found* is a value (`Ok(None)` or [`ObjectDbError::NotFound`]
//! depending on the call), not a thrown error.

mod bounded;
mod connection;
mod fake;
mod retry;
mod s3;

pub use bounded::BoundedObjectClient;
pub use connection::{parse as parse_connection_string, ConnectionInfo, Scheme};
pub use fake::FakeObjectClient;
pub use s3::S3ObjectClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use objectdb_errors::ObjectDbResult;
use std::collections::HashMap;
use std::sync::Arc;

/// Preconditions and framing for a `putObject` call.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// `Some("*")` means "only if the key does not already exist"; `Some(etag)`
    /// means "only if the current etag matches exactly".
    pub if_match: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PutResult {
    pub etag: String,
    pub version_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GetResult {
    pub body: Vec<u8>,
    pub metadata: HashMap<String, String>,
    pub etag: String,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct HeadResult {
    pub metadata: HashMap<String, String>,
    pub etag: String,
    pub content_length: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub continuation_token: Option<String>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ListEntry {
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ListPage {
    pub keys: Vec<ListEntry>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    pub key: String,
    pub deleted: bool,
    pub error: Option<String>,
}

/// Metadata keys are lowercased and space-normalized before being handed to
/// the store, matching what every S3-compatible implementation does to HTTP
/// headers internally; doing it here keeps the behavior visible and testable.
pub fn normalize_metadata_key(key: &str) -> String {
    key.trim().to_lowercase().replace(' ', "-")
}

pub fn normalize_metadata(metadata: &HashMap<String, String>) -> HashMap<String, String> {
    metadata
        .iter()
        .map(|(k, v)| (normalize_metadata_key(k), v.clone()))
        .collect()
}

#[async_trait]
pub trait ObjectClient: Send + Sync {
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: HashMap<String, String>,
        options: PutOptions,
    ) -> ObjectDbResult<PutResult>;

    async fn get_object(&self, key: &str) -> ObjectDbResult<GetResult>;

    async fn head_object(&self, key: &str) -> ObjectDbResult<HeadResult>;

    /// Idempotent: deleting a key that does not exist is success.
    async fn delete_object(&self, key: &str) -> ObjectDbResult<()>;

    async fn list_objects(&self, prefix: &str, options: ListOptions) -> ObjectDbResult<ListPage>;

    async fn delete_objects(&self, keys: &[String]) -> ObjectDbResult<Vec<DeleteOutcome>>;
}

/// Builds the right `ObjectClient` for a connection string: `use_fake` always
/// wins, otherwise the scheme picks the S3-backed implementation. The result
/// is wrapped in a [`BoundedObjectClient`] capping in-flight calls to
/// `concurrency_cap` (spec §5 default 64), shared by every resource, batch
/// operation, and streaming iterator on this `Database`.
pub async fn connect(
    connection_string: &str,
    use_fake: bool,
    cost: Arc<objectdb_cost::CostAccountant>,
    concurrency_cap: usize,
) -> ObjectDbResult<Arc<dyn ObjectClient>> {
    let info = connection::parse(connection_string)?;
    let inner: Arc<dyn ObjectClient> = if use_fake {
        Arc::new(FakeObjectClient::new(cost))
    } else {
        Arc::new(S3ObjectClient::new(info, cost).await?)
    };
    Ok(Arc::new(BoundedObjectClient::new(inner, concurrency_cap)))
}
