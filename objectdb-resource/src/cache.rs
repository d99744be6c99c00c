//! Read-through, single-writer-per-key cache for `get` (spec §4.5, §5).
//!
//! Grounded on the teacher's `MemoryCache` concurrency shape
//! (`aerolithdb-storage/src/backends.rs`, an `Arc<RwLock<HashMap<..>>>`),
//! applied here to request deduplication rather than tiering: concurrent
//! misses on the same key are coalesced into one upstream read via an
//! in-flight registry of `Notify` handles. A failed read never populates the
//! cache.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::record::Record;

enum Slot {
    InFlight(Arc<Notify>),
    Ready(Record),
}

#[derive(Default)]
pub struct SingleFlightCache {
    slots: Mutex<HashMap<String, Slot>>,
}

pub enum CacheLookup {
    Hit(Record),
    Miss,
}

impl SingleFlightCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a cached record, joins an in-flight fetch for the same key
    /// until it completes, or claims the right to fetch by returning `Miss`
    /// (the caller must then call `complete` or `fail`).
    pub async fn get_or_claim(&self, id: &str) -> CacheLookup {
        loop {
            let notify = {
                let mut slots = self.slots.lock();
                match slots.get(id) {
                    Some(Slot::Ready(record)) => return CacheLookup::Hit(record.clone()),
                    Some(Slot::InFlight(notify)) => notify.clone(),
                    None => {
                        slots.insert(id.to_string(), Slot::InFlight(Arc::new(Notify::new())));
                        return CacheLookup::Miss;
                    }
                }
            };
            notify.notified().await;
        }
    }

    /// Populates the cache after a successful upstream fetch and wakes any
    /// waiters that joined the in-flight read.
    pub fn complete(&self, id: &str, record: Record) {
        let notify = {
            let mut slots = self.slots.lock();
            let previous = slots.insert(id.to_string(), Slot::Ready(record));
            match previous {
                Some(Slot::InFlight(notify)) => Some(notify),
                _ => None,
            }
        };
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
    }

    /// A failed fetch clears the in-flight marker without populating the
    /// cache, so the next caller (or a joined waiter) retries from scratch.
    pub fn fail(&self, id: &str) {
        let notify = {
            let mut slots = self.slots.lock();
            match slots.remove(id) {
                Some(Slot::InFlight(notify)) => Some(notify),
                _ => None,
            }
        };
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
    }

    /// Writes (`insert`/`update`/`upsert`/`delete`) invalidate synchronously
    /// before returning.
    pub fn invalidate(&self, id: &str) {
        self.slots.lock().remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objectdb_schema::{AttributeMap, SchemaVersion};

    fn record(id: &str) -> Record {
        Record {
            id: id.to_string(),
            attributes: AttributeMap::new(),
            version: SchemaVersion::initial(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn first_caller_claims_miss_second_joins_and_sees_completion() {
        let cache = SingleFlightCache::new();
        assert!(matches!(cache.get_or_claim("a").await, CacheLookup::Miss));

        let cache = Arc::new(cache);
        let joiner = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_or_claim("a").await })
        };
        tokio::task::yield_now().await;
        cache.complete("a", record("a"));

        match joiner.await.unwrap() {
            CacheLookup::Hit(r) => assert_eq!(r.id, "a"),
            CacheLookup::Miss => panic!("expected the joiner to see the completed fetch"),
        }
    }

    #[tokio::test]
    async fn failed_fetch_does_not_populate_cache() {
        let cache = SingleFlightCache::new();
        assert!(matches!(cache.get_or_claim("a").await, CacheLookup::Miss));
        cache.fail("a");
        assert!(matches!(cache.get_or_claim("a").await, CacheLookup::Miss));
    }

    #[test]
    fn invalidate_clears_a_ready_entry() {
        let cache = SingleFlightCache::new();
        cache.complete("a", record("a"));
        cache.invalidate("a");
        assert!(cache.slots.lock().get("a").is_none());
    }
}
