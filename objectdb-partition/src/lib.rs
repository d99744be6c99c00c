//! Secondary-partition pointer objects (spec §4.4).
//!
//! A partition is materialized purely as zero-byte pointer objects whose key
//! encodes the record's partition-field values; there is no separate index
//! data structure to keep consistent — the object store's LIST *is* the
//! index. Key derivation is grounded on the teacher's deterministic,
//! order-preserving shard-key derivation (`aerolithdb-storage/src/sharding.rs`),
//! generalized from a hash ring to prefix-structured partition keys.

use async_trait::async_trait;
use objectdb_client::{ListOptions, ObjectClient, PutOptions};
use objectdb_errors::{ErrorContext, ObjectDbResult};
use objectdb_schema::{AttributeMap, AttributeValue, FieldType};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// A declared secondary index: a name plus an ordered list of fields.
/// Declaration order matters — it is the order pointer-key segments appear
/// in, which is what makes prefix listing group records by leading fields.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PartitionDef {
    pub name: String,
    pub fields: Vec<(String, FieldType)>,
}

impl PartitionDef {
    pub fn new(name: impl Into<String>, fields: Vec<(String, FieldType)>) -> Self {
        Self { name: name.into(), fields }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RebuildReport {
    pub written: usize,
    pub removed: usize,
}

fn stringify(value: &AttributeValue) -> String {
    match value {
        AttributeValue::Str(s) => s.clone(),
        AttributeValue::Num(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                n.to_string()
            }
        }
        AttributeValue::Bool(b) => b.to_string(),
        AttributeValue::Time(t) => t.to_rfc3339(),
        _ => String::new(),
    }
}

/// Percent-encodes the one byte (`/`) that would otherwise break key
/// segmentation; everything else passes through untouched.
fn encode_segment(value: &str) -> String {
    value.replace('%', "%25").replace('/', "%2F")
}

fn decode_segment(value: &str) -> String {
    value.replace("%2F", "/").replace("%25", "%")
}

/// Projects a record onto a partition's declared fields, in declaration
/// order. A missing or null field value projects to an empty string so a
/// partition never fails to materialize a pointer for want of an optional
/// field.
pub fn project(partition: &PartitionDef, record: &AttributeMap) -> Vec<(String, String)> {
    partition
        .fields
        .iter()
        .map(|(name, _ty)| {
            let value = record.get(name).map(stringify).unwrap_or_default();
            (name.clone(), value)
        })
        .collect()
}

fn prefix_with_bound(resource: &str, partition: &str, bound: &[(String, String)]) -> String {
    let mut key = format!("resource={resource}/partitions/{partition}/");
    for (field, value) in bound {
        key.push_str(&format!("{field}={}/", encode_segment(value)));
    }
    key
}

pub fn pointer_key(resource: &str, partition: &PartitionDef, values: &[(String, String)], record_id: &str) -> String {
    format!("{}id={record_id}", prefix_with_bound(resource, &partition.name, values))
}

fn record_id_from_key(key: &str) -> Option<&str> {
    key.rsplit('/').next()?.strip_prefix("id=")
}

#[async_trait]
pub trait PartitionIndexOps: Send + Sync {
    async fn write_pointers(&self, resource: &str, partitions: &[PartitionDef], record_id: &str, record: &AttributeMap) -> ObjectDbResult<()>;
    async fn delete_pointers(&self, resource: &str, partitions: &[PartitionDef], record_id: &str, record: &AttributeMap) -> ObjectDbResult<()>;
}

/// Owns the `ObjectClient` handle used to write/list/reconcile pointer
/// objects for every partition on a resource.
pub struct PartitionIndex {
    client: Arc<dyn ObjectClient>,
}

impl PartitionIndex {
    pub fn new(client: Arc<dyn ObjectClient>) -> Self {
        Self { client }
    }

    async fn write_one(&self, resource: &str, partition: &PartitionDef, record_id: &str, record: &AttributeMap) -> ObjectDbResult<()> {
        let values = project(partition, record);
        let key = pointer_key(resource, partition, &values, record_id);
        self.client.put_object(&key, Vec::new(), HashMap::new(), PutOptions::default()).await?;
        Ok(())
    }

    async fn delete_one(&self, resource: &str, partition: &PartitionDef, record_id: &str, record: &AttributeMap) -> ObjectDbResult<()> {
        let values = project(partition, record);
        let key = pointer_key(resource, partition, &values, record_id);
        self.client.delete_object(&key).await
    }

    /// Writes one pointer per declared partition. A no-op, with no I/O at
    /// all, for a resource with zero partitions (spec §8 boundary case).
    pub async fn write_pointers(&self, resource: &str, partitions: &[PartitionDef], record_id: &str, record: &AttributeMap) -> ObjectDbResult<()> {
        for partition in partitions {
            self.write_one(resource, partition, record_id, record).await?;
        }
        Ok(())
    }

    /// Deletes the pointer this record's *current* partition-field values
    /// derive to. The caller passes whichever attribute snapshot (old, for
    /// an update repartition; current, for a delete) derives the pointer to
    /// remove.
    pub async fn delete_pointers(&self, resource: &str, partitions: &[PartitionDef], record_id: &str, record: &AttributeMap) -> ObjectDbResult<()> {
        for partition in partitions {
            self.delete_one(resource, partition, record_id, record).await?;
        }
        Ok(())
    }

    /// Rewrites only the pointers whose partition-field projection changed
    /// between `old` and `new` (spec `update` contract: "rewrites partition
    /// pointers whose fields changed").
    pub async fn rewrite_changed(
        &self,
        resource: &str,
        partitions: &[PartitionDef],
        record_id: &str,
        old: &AttributeMap,
        new: &AttributeMap,
    ) -> ObjectDbResult<()> {
        for partition in partitions {
            let old_values = project(partition, old);
            let new_values = project(partition, new);
            if old_values == new_values {
                continue;
            }
            let old_key = pointer_key(resource, partition, &old_values, record_id);
            let new_key = pointer_key(resource, partition, &new_values, record_id);
            self.client.put_object(&new_key, Vec::new(), HashMap::new(), PutOptions::default()).await?;
            self.client.delete_object(&old_key).await?;
        }
        Ok(())
    }

    /// Lists record ids matching a (possibly partial, leading-fields-only)
    /// selector. Any listed pointer whose primary object no longer exists is
    /// deleted inline and excluded from the result — the lazy half of the
    /// reconciliation policy in SPEC_FULL.md §9.
    pub async fn list(&self, resource: &str, partition: &PartitionDef, selector: &HashMap<String, String>) -> ObjectDbResult<Vec<String>> {
        let mut bound = Vec::new();
        for (name, _ty) in &partition.fields {
            match selector.get(name) {
                Some(value) => bound.push((name.clone(), value.clone())),
                None => break,
            }
        }
        let prefix = prefix_with_bound(resource, &partition.name, &bound);

        let mut ids = Vec::new();
        let mut token = None;
        loop {
            let page = self
                .client
                .list_objects(&prefix, ListOptions { continuation_token: token.clone(), page_size: Some(1000) })
                .await?;
            for entry in &page.keys {
                if let Some(id) = record_id_from_key(&entry.key) {
                    ids.push((entry.key.clone(), decode_segment(id)));
                }
            }
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        let mut live = Vec::with_capacity(ids.len());
        for (pointer_key, record_id) in ids {
            let data_key = format!("resource={resource}/data/id={record_id}");
            match self.client.head_object(&data_key).await {
                Ok(_) => live.push(record_id),
                Err(_) => {
                    debug!(pointer = %pointer_key, "reclaiming orphan partition pointer");
                    let _ = self.client.delete_object(&pointer_key).await;
                }
            }
        }
        Ok(live)
    }

    /// Maintenance sweep: given the full set of live records for a resource,
    /// reconciles one partition's pointers — writes any missing, removes any
    /// whose record is no longer live. Shares key derivation with the lazy
    /// path so the two can never diverge in behavior.
    pub async fn rebuild(&self, resource: &str, partition: &PartitionDef, live_records: &[(String, AttributeMap)]) -> ObjectDbResult<RebuildReport> {
        let desired: HashSet<String> = live_records
            .iter()
            .map(|(id, record)| {
                let values = project(partition, record);
                pointer_key(resource, partition, &values, id)
            })
            .collect();

        let prefix = format!("resource={resource}/partitions/{}/", partition.name);
        let mut existing = HashSet::new();
        let mut token = None;
        loop {
            let page = self
                .client
                .list_objects(&prefix, ListOptions { continuation_token: token.clone(), page_size: Some(1000) })
                .await?;
            for entry in &page.keys {
                existing.insert(entry.key.clone());
            }
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        let mut report = RebuildReport::default();
        for key in desired.difference(&existing) {
            self.client.put_object(key, Vec::new(), HashMap::new(), PutOptions::default()).await?;
            report.written += 1;
        }
        for key in existing.difference(&desired) {
            self.client.delete_object(key).await?;
            report.removed += 1;
        }
        Ok(report)
    }
}

#[async_trait]
impl PartitionIndexOps for PartitionIndex {
    async fn write_pointers(&self, resource: &str, partitions: &[PartitionDef], record_id: &str, record: &AttributeMap) -> ObjectDbResult<()> {
        PartitionIndex::write_pointers(self, resource, partitions, record_id, record).await
    }

    async fn delete_pointers(&self, resource: &str, partitions: &[PartitionDef], record_id: &str, record: &AttributeMap) -> ObjectDbResult<()> {
        PartitionIndex::delete_pointers(self, resource, partitions, record_id, record).await
    }
}

pub fn unknown_partition(name: &str, resource: &str) -> objectdb_errors::ObjectDbError {
    objectdb_errors::ObjectDbError::UnknownPartition {
        context: ErrorContext::new().with_resource(resource).with_partition(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objectdb_client::FakeObjectClient;
    use objectdb_cost::CostAccountant;

    fn client() -> Arc<dyn ObjectClient> {
        Arc::new(FakeObjectClient::new(Arc::new(CostAccountant::default())))
    }

    fn order(status: &str, total: f64) -> AttributeMap {
        let mut m = AttributeMap::new();
        m.insert("status".to_string(), AttributeValue::Str(status.to_string()));
        m.insert("total".to_string(), AttributeValue::Num(total));
        m
    }

    #[tokio::test]
    async fn write_then_list_by_partition_finds_the_record() {
        let client = client();
        let index = PartitionIndex::new(client.clone());
        let partition = PartitionDef::new("byStatus", vec![("status".to_string(), FieldType::String)]);

        client
            .put_object("resource=orders/data/id=o1", Vec::new(), HashMap::new(), PutOptions::default())
            .await
            .unwrap();
        index.write_pointers("orders", &[partition.clone()], "o1", &order("new", 42.0)).await.unwrap();

        let mut selector = HashMap::new();
        selector.insert("status".to_string(), "new".to_string());
        let ids = index.list("orders", &partition, &selector).await.unwrap();
        assert_eq!(ids, vec!["o1".to_string()]);
    }

    #[tokio::test]
    async fn rewrite_changed_moves_the_pointer() {
        let client = client();
        let index = PartitionIndex::new(client.clone());
        let partition = PartitionDef::new("byStatus", vec![("status".to_string(), FieldType::String)]);

        client
            .put_object("resource=orders/data/id=o1", Vec::new(), HashMap::new(), PutOptions::default())
            .await
            .unwrap();
        let old = order("new", 42.0);
        index.write_pointers("orders", &[partition.clone()], "o1", &old).await.unwrap();

        let new = order("paid", 42.0);
        index.rewrite_changed("orders", &[partition.clone()], "o1", &old, &new).await.unwrap();

        let mut selector = HashMap::new();
        selector.insert("status".to_string(), "new".to_string());
        assert!(index.list("orders", &partition, &selector).await.unwrap().is_empty());

        selector.insert("status".to_string(), "paid".to_string());
        assert_eq!(index.list("orders", &partition, &selector).await.unwrap(), vec!["o1".to_string()]);
    }

    #[tokio::test]
    async fn list_reclaims_orphan_pointer_lazily() {
        let client = client();
        let index = PartitionIndex::new(client.clone());
        let partition = PartitionDef::new("byStatus", vec![("status".to_string(), FieldType::String)]);

        // Pointer with no matching primary object: simulates a deleted record.
        index.write_pointers("orders", &[partition.clone()], "ghost", &order("new", 1.0)).await.unwrap();

        let mut selector = HashMap::new();
        selector.insert("status".to_string(), "new".to_string());
        let ids = index.list("orders", &partition, &selector).await.unwrap();
        assert!(ids.is_empty());

        let page = client.list_objects("resource=orders/partitions/byStatus/", ListOptions::default()).await.unwrap();
        assert!(page.keys.is_empty());
    }

    #[tokio::test]
    async fn rebuild_reconciles_missing_and_orphaned_pointers() {
        let client = client();
        let index = PartitionIndex::new(client.clone());
        let partition = PartitionDef::new("byStatus", vec![("status".to_string(), FieldType::String)]);

        // Orphan: a pointer with no corresponding live record.
        index.write_pointers("orders", &[partition.clone()], "stale", &order("new", 1.0)).await.unwrap();

        let live = vec![("o1".to_string(), order("paid", 2.0))];
        let report = index.rebuild("orders", &partition, &live).await.unwrap();
        assert_eq!(report.written, 1);
        assert_eq!(report.removed, 1);
    }

    #[test]
    fn percent_encoding_round_trips_slash_in_values() {
        assert_eq!(decode_segment(&encode_segment("a/b%c")), "a/b%c");
    }
}
