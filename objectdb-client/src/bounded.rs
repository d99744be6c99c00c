//! Per-`Database`-instance concurrency bound (spec §5: "the executor may
//! schedule many in parallel but must bound concurrency per Database
//! instance (default 64) to avoid overwhelming the store").
//!
//! This wraps any [`ObjectClient`] and gates every call behind a shared
//! semaphore, so the bound applies uniformly regardless of how many
//! resources, batch operations, or streaming iterators are issuing calls
//! concurrently against the same `Database`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use objectdb_errors::ObjectDbResult;
use tokio::sync::Semaphore;

use crate::{DeleteOutcome, GetResult, HeadResult, ListOptions, ListPage, ObjectClient, PutOptions, PutResult};

pub struct BoundedObjectClient {
    inner: Arc<dyn ObjectClient>,
    permits: Arc<Semaphore>,
}

impl BoundedObjectClient {
    /// `max_concurrent` is clamped to at least 1 so a misconfigured `0` never
    /// deadlocks every caller.
    pub fn new(inner: Arc<dyn ObjectClient>, max_concurrent: usize) -> Self {
        Self { inner, permits: Arc::new(Semaphore::new(max_concurrent.max(1))) }
    }
}

#[async_trait]
impl ObjectClient for BoundedObjectClient {
    async fn put_object(&self, key: &str, body: Vec<u8>, metadata: HashMap<String, String>, options: PutOptions) -> ObjectDbResult<PutResult> {
        let _permit = self.permits.acquire().await.expect("semaphore is never closed");
        self.inner.put_object(key, body, metadata, options).await
    }

    async fn get_object(&self, key: &str) -> ObjectDbResult<GetResult> {
        let _permit = self.permits.acquire().await.expect("semaphore is never closed");
        self.inner.get_object(key).await
    }

    async fn head_object(&self, key: &str) -> ObjectDbResult<HeadResult> {
        let _permit = self.permits.acquire().await.expect("semaphore is never closed");
        self.inner.head_object(key).await
    }

    async fn delete_object(&self, key: &str) -> ObjectDbResult<()> {
        let _permit = self.permits.acquire().await.expect("semaphore is never closed");
        self.inner.delete_object(key).await
    }

    async fn list_objects(&self, prefix: &str, options: ListOptions) -> ObjectDbResult<ListPage> {
        let _permit = self.permits.acquire().await.expect("semaphore is never closed");
        self.inner.list_objects(prefix, options).await
    }

    async fn delete_objects(&self, keys: &[String]) -> ObjectDbResult<Vec<DeleteOutcome>> {
        let _permit = self.permits.acquire().await.expect("semaphore is never closed");
        self.inner.delete_objects(keys).await
    }
}
