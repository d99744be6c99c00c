//! Database orchestration (spec §4.6): manifest persistence, the resource
//! registry, and the plugin lifecycle, built on every other `objectdb-*`
//! crate. Grounded on the teacher's `AerolithsDB` top-level orchestration
//! struct (`aerolithdb-core/src/lib.rs`), whose ordered subsystem startup
//! this module's `connect` mirrors for resources and plugins instead of
//! storage tiers, consensus, and network peers.

mod config;
mod database;
mod manifest;

pub use config::{DatabaseConfig, RetryPolicy};
pub use database::{Database, ResourceInit};
pub use manifest::{Manifest, PluginState, ResourceSpec, SchemaVersionSpec, MANIFEST_KEY};

#[cfg(test)]
mod tests {
    use super::*;
    use objectdb_codec::Behavior;
    use objectdb_partition::PartitionDef;
    use objectdb_schema::{AttributeValue, FieldSpec, FieldType};
    use std::collections::BTreeMap;

    fn fake_config() -> DatabaseConfig {
        DatabaseConfig { use_fake: true, connection_string: "s3://k:s@local/bucket/root".to_string(), ..DatabaseConfig::default() }
    }

    fn schema(fields: &[(&str, &str)]) -> BTreeMap<String, FieldSpec> {
        fields.iter().map(|(n, r)| (n.to_string(), FieldSpec::new(*r))).collect()
    }

    #[tokio::test]
    async fn connect_initializes_an_empty_manifest_when_absent() {
        let db = Database::new(fake_config());
        db.connect().await.unwrap();
        assert!(db.resource("orders").is_none());
    }

    #[tokio::test]
    async fn create_resource_persists_and_is_queryable_after_reconnect() {
        let db = Database::new(fake_config());
        db.connect().await.unwrap();
        db.create_resource(ResourceInit::new("orders", schema(&[("status", "string|required")]))).await.unwrap();

        let resource = db.resource("orders").unwrap();
        let record = resource
            .insert(
                [("status".to_string(), AttributeValue::Str("new".into()))].into_iter().collect(),
                Some("o1".to_string()),
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(record.id, "o1");
    }

    #[tokio::test]
    async fn create_resource_rejects_duplicate_names() {
        let db = Database::new(fake_config());
        db.connect().await.unwrap();
        db.create_resource(ResourceInit::new("orders", schema(&[("status", "string|required")]))).await.unwrap();
        let err = db.create_resource(ResourceInit::new("orders", schema(&[("status", "string|required")]))).await.unwrap_err();
        assert_eq!(err.code(), "AlreadyExists");
    }

    #[tokio::test]
    async fn update_attributes_evolves_schema_without_rewriting_old_records() {
        let db = Database::new(fake_config());
        db.connect().await.unwrap();
        db.create_resource(ResourceInit::new("orders", schema(&[("status", "string|required")]))).await.unwrap();

        let resource = db.resource("orders").unwrap();
        let old = resource
            .insert([("status".to_string(), AttributeValue::Str("new".into()))].into_iter().collect(), Some("pre".into()), None, None)
            .await
            .unwrap();

        db.update_attributes("orders", schema(&[("status", "string|required"), ("tax", "number|optional")])).await.unwrap();

        let refetched = resource.get(&old.id, None).await.unwrap();
        assert_eq!(refetched.attributes.get("tax"), None);
        assert_eq!(refetched.version, old.version);

        let post = resource
            .insert(
                [("status".to_string(), AttributeValue::Str("new".into())), ("tax".to_string(), AttributeValue::Num(1.0))]
                    .into_iter()
                    .collect(),
                Some("post".into()),
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(post.version.to_string(), "v1");
    }

    #[tokio::test]
    async fn drop_resource_removes_it_from_the_registry() {
        let db = Database::new(fake_config());
        db.connect().await.unwrap();
        db.create_resource(ResourceInit::new("orders", schema(&[("status", "string|required")]))).await.unwrap();
        db.drop_resource("orders", false).await.unwrap();
        assert!(db.resource("orders").is_none());
    }

    #[tokio::test]
    async fn create_resource_with_partitions_is_immediately_queryable() {
        let db = Database::new(fake_config());
        db.connect().await.unwrap();
        db.create_resource(
            ResourceInit::new("orders", schema(&[("status", "string|required")]))
                .with_behavior(Behavior::Mixed)
                .with_partitions(vec![PartitionDef::new("byStatus", vec![("status".to_string(), FieldType::String)])]),
        )
        .await
        .unwrap();

        let resource = db.resource("orders").unwrap();
        resource
            .insert([("status".to_string(), AttributeValue::Str("new".into()))].into_iter().collect(), Some("o1".into()), None, None)
            .await
            .unwrap();

        let mut selector = std::collections::HashMap::new();
        selector.insert("status".to_string(), "new".to_string());
        let found = resource.list_by_partition("byStatus", selector, None).await.unwrap();
        assert_eq!(found.len(), 1);
    }
}
