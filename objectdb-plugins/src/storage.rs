//! Plugin-private storage, namespaced to `plugin=<id>/...` (spec §4.7).
//!
//! Wraps an `ObjectClient` the same way `Resource` wraps one for record data,
//! but the namespace prefix is baked into every key at construction time so a
//! plugin has no way to address a key outside its own prefix.

use std::collections::HashMap;
use std::sync::Arc;

use objectdb_client::{ListOptions, ListPage, ObjectClient, PutOptions};
use objectdb_errors::ObjectDbResult;

#[derive(Clone)]
pub struct PluginStorage {
    client: Arc<dyn ObjectClient>,
    prefix: String,
}

impl PluginStorage {
    pub fn new(client: Arc<dyn ObjectClient>, plugin_id: &str) -> Self {
        Self { client, prefix: format!("plugin={plugin_id}/") }
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    pub async fn put(&self, key: &str, body: Vec<u8>, metadata: HashMap<String, String>, options: PutOptions) -> ObjectDbResult<()> {
        self.client.put_object(&self.namespaced(key), body, metadata, options).await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> ObjectDbResult<Vec<u8>> {
        Ok(self.client.get_object(&self.namespaced(key)).await?.body)
    }

    pub async fn delete(&self, key: &str) -> ObjectDbResult<()> {
        self.client.delete_object(&self.namespaced(key)).await
    }

    pub async fn exists(&self, key: &str) -> ObjectDbResult<bool> {
        match self.client.head_object(&self.namespaced(key)).await {
            Ok(_) => Ok(true),
            Err(objectdb_errors::ObjectDbError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Lists keys under `sub_prefix` relative to this plugin's namespace;
    /// returned keys have the namespace prefix stripped.
    pub async fn list(&self, sub_prefix: &str, options: ListOptions) -> ObjectDbResult<ListPage> {
        let mut page = self.client.list_objects(&self.namespaced(sub_prefix), options).await?;
        for entry in &mut page.keys {
            if let Some(stripped) = entry.key.strip_prefix(&self.prefix) {
                entry.key = stripped.to_string();
            }
        }
        Ok(page)
    }

    /// Removes every object under this plugin's namespace (used by
    /// `uninstall` when the caller asks for storage to be purged).
    pub async fn purge(&self) -> ObjectDbResult<()> {
        let mut token = None;
        loop {
            let page = self.client.list_objects(&self.prefix, ListOptions { continuation_token: token.clone(), page_size: Some(1000) }).await?;
            let keys: Vec<String> = page.keys.iter().map(|e| e.key.clone()).collect();
            if !keys.is_empty() {
                self.client.delete_objects(&keys).await?;
            }
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objectdb_client::FakeObjectClient;
    use objectdb_cost::CostAccountant;

    fn storage(id: &str) -> PluginStorage {
        let client: Arc<dyn ObjectClient> = Arc::new(FakeObjectClient::new(Arc::new(CostAccountant::default())));
        PluginStorage::new(client, id)
    }

    #[tokio::test]
    async fn keys_are_confined_to_the_plugin_namespace() {
        let storage = storage("scheduler");
        storage.put("locks/job1", b"payload".to_vec(), HashMap::new(), PutOptions::default()).await.unwrap();
        let page = storage.list("locks/", ListOptions::default()).await.unwrap();
        assert_eq!(page.keys.len(), 1);
        assert_eq!(page.keys[0].key, "locks/job1");
    }

    #[tokio::test]
    async fn purge_removes_every_namespaced_key() {
        let storage = storage("scheduler");
        storage.put("a", b"1".to_vec(), HashMap::new(), PutOptions::default()).await.unwrap();
        storage.put("b", b"2".to_vec(), HashMap::new(), PutOptions::default()).await.unwrap();
        storage.purge().await.unwrap();
        assert!(!storage.exists("a").await.unwrap());
        assert!(!storage.exists("b").await.unwrap());
    }
}
