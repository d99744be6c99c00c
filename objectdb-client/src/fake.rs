//! In-memory object store, semantically identical to the S3-backed client.
//!
//! Grounded on the teacher's `MemoryCache` (`Arc<RwLock<HashMap<...>>>` keyed
//! storage), generalized to full object semantics: etags, conditional puts,
//! and paginated listing.

use crate::{
    normalize_metadata, DeleteOutcome, GetResult, HeadResult, ListEntry, ListOptions, ListPage,
    ObjectClient, PutOptions, PutResult,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use objectdb_cost::{CostAccountant, StoreCommand};
use objectdb_errors::{ErrorContext, ObjectDbError, ObjectDbResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone)]
struct StoredObject {
    body: Vec<u8>,
    metadata: HashMap<String, String>,
    etag: String,
    last_modified: chrono::DateTime<Utc>,
}

/// `useFake` backend: identical operation surface and error semantics to
/// [`crate::S3ObjectClient`], backed by a `DashMap` instead of a network call.
pub struct FakeObjectClient {
    objects: DashMap<String, StoredObject>,
    etag_counter: AtomicU64,
    cost: Arc<CostAccountant>,
}

impl FakeObjectClient {
    pub fn new(cost: Arc<CostAccountant>) -> Self {
        Self { objects: DashMap::new(), etag_counter: AtomicU64::new(0), cost }
    }

    fn next_etag(&self) -> String {
        let n = self.etag_counter.fetch_add(1, Ordering::SeqCst);
        format!("\"fake-etag-{n:016x}\"")
    }
}

#[async_trait]
impl ObjectClient for FakeObjectClient {
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: HashMap<String, String>,
        options: PutOptions,
    ) -> ObjectDbResult<PutResult> {
        let request_bytes = body.len() as u64;
        if let Some(expected) = &options.if_match {
            match self.objects.get(key) {
                Some(existing) if expected == "*" => {
                    self.cost.report(StoreCommand::Put, request_bytes, 0);
                    return Err(ObjectDbError::AlreadyExists {
                        context: ErrorContext::new().with_record_id(existing.etag.clone()),
                    });
                }
                Some(existing) if &existing.etag != expected => {
                    self.cost.report(StoreCommand::Put, request_bytes, 0);
                    return Err(ObjectDbError::StoreRejected {
                        message: "precondition failed: etag mismatch".into(),
                        context: ErrorContext::new(),
                    });
                }
                None if expected != "*" => {
                    self.cost.report(StoreCommand::Put, request_bytes, 0);
                    return Err(ObjectDbError::StoreRejected {
                        message: "precondition failed: object does not exist".into(),
                        context: ErrorContext::new(),
                    });
                }
                _ => {}
            }
        }

        let etag = self.next_etag();
        self.objects.insert(
            key.to_string(),
            StoredObject {
                body,
                metadata: normalize_metadata(&metadata),
                etag: etag.clone(),
                last_modified: Utc::now(),
            },
        );
        self.cost.report(StoreCommand::Put, request_bytes, 0);
        Ok(PutResult { etag, version_id: None })
    }

    async fn get_object(&self, key: &str) -> ObjectDbResult<GetResult> {
        let obj = self.objects.get(key).ok_or_else(|| {
            ObjectDbError::NotFound { context: ErrorContext::new() }
        })?;
        let response_bytes = obj.body.len() as u64;
        self.cost.report(StoreCommand::Get, 0, response_bytes);
        Ok(GetResult {
            body: obj.body.clone(),
            metadata: obj.metadata.clone(),
            etag: obj.etag.clone(),
            last_modified: Some(obj.last_modified),
        })
    }

    async fn head_object(&self, key: &str) -> ObjectDbResult<HeadResult> {
        let obj = self.objects.get(key).ok_or_else(|| {
            ObjectDbError::NotFound { context: ErrorContext::new() }
        })?;
        self.cost.report(StoreCommand::Head, 0, 0);
        Ok(HeadResult {
            metadata: obj.metadata.clone(),
            etag: obj.etag.clone(),
            content_length: obj.body.len() as u64,
            last_modified: Some(obj.last_modified),
        })
    }

    async fn delete_object(&self, key: &str) -> ObjectDbResult<()> {
        self.objects.remove(key);
        self.cost.report(StoreCommand::Delete, 0, 0);
        Ok(())
    }

    async fn list_objects(&self, prefix: &str, options: ListOptions) -> ObjectDbResult<ListPage> {
        let mut keys: Vec<String> =
            self.objects.iter().map(|e| e.key().clone()).filter(|k| k.starts_with(prefix)).collect();
        keys.sort();

        let start = match &options.continuation_token {
            Some(token) => keys.iter().position(|k| k == token).map(|i| i + 1).unwrap_or(0),
            None => 0,
        };
        let page_size = options.page_size.unwrap_or(1000) as usize;
        let page: Vec<String> = keys.iter().skip(start).take(page_size).cloned().collect();
        let next_token = if start + page.len() < keys.len() { page.last().cloned() } else { None };

        let entries = page
            .into_iter()
            .filter_map(|k| {
                self.objects.get(&k).map(|obj| ListEntry {
                    key: k,
                    size: obj.body.len() as u64,
                    etag: obj.etag.clone(),
                    last_modified: Some(obj.last_modified),
                })
            })
            .collect();

        self.cost.report(StoreCommand::List, 0, 0);
        Ok(ListPage { keys: entries, next_token })
    }

    async fn delete_objects(&self, keys: &[String]) -> ObjectDbResult<Vec<DeleteOutcome>> {
        let outcomes = keys
            .iter()
            .map(|k| {
                self.objects.remove(k);
                DeleteOutcome { key: k.clone(), deleted: true, error: None }
            })
            .collect();
        self.cost.report(StoreCommand::DeleteBatch, 0, 0);
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn client() -> FakeObjectClient {
        FakeObjectClient::new(Arc::new(CostAccountant::default()))
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let c = client();
        c.put_object("k1", b"hello".to_vec(), HashMap::new(), PutOptions::default()).await.unwrap();
        let got = c.get_object("k1").await.unwrap();
        assert_eq!(got.body, b"hello");
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let c = client();
        let err = c.get_object("missing").await.unwrap_err();
        assert_eq!(err.code(), "NotFound");
    }

    #[tokio::test]
    async fn delete_missing_key_is_success() {
        let c = client();
        assert!(c.delete_object("missing").await.is_ok());
    }

    #[tokio::test]
    async fn if_match_star_rejects_existing_key() {
        let c = client();
        c.put_object("k1", b"a".to_vec(), HashMap::new(), PutOptions::default()).await.unwrap();
        let opts = PutOptions { if_match: Some("*".into()), content_type: None };
        let err = c.put_object("k1", b"b".to_vec(), HashMap::new(), opts).await.unwrap_err();
        assert_eq!(err.code(), "AlreadyExists");
    }

    #[tokio::test]
    async fn if_match_star_allows_new_key() {
        let c = client();
        let opts = PutOptions { if_match: Some("*".into()), content_type: None };
        assert!(c.put_object("new", b"a".to_vec(), HashMap::new(), opts).await.is_ok());
    }

    #[tokio::test]
    async fn conditional_put_rejects_stale_etag() {
        let c = client();
        let first = c.put_object("k1", b"a".to_vec(), HashMap::new(), PutOptions::default()).await.unwrap();
        c.put_object("k1", b"b".to_vec(), HashMap::new(), PutOptions::default()).await.unwrap();
        let opts = PutOptions { if_match: Some(first.etag), content_type: None };
        let err = c.put_object("k1", b"c".to_vec(), HashMap::new(), opts).await.unwrap_err();
        assert_eq!(err.code(), "StoreRejected");
    }

    #[tokio::test]
    async fn list_paginates_by_page_size() {
        let c = client();
        for i in 0..5 {
            c.put_object(&format!("p/{i}"), vec![], HashMap::new(), PutOptions::default()).await.unwrap();
        }
        let opts = ListOptions { continuation_token: None, page_size: Some(2) };
        let page1 = c.list_objects("p/", opts).await.unwrap();
        assert_eq!(page1.keys.len(), 2);
        assert!(page1.next_token.is_some());
    }
}
