//! A minimal demonstration of the scheduler contract named in spec §5/§6.3:
//! a plugin that takes out TTL'd job locks in its own namespaced storage and
//! keeps a small run history there, and touches no core resource or event
//! subscription to do it.
//!
//! Grounded on [`objectdb_plugins`]'s `ObjectDbPlugin`/`PluginHost` split
//! (`objectdb-plugins/src/plugin.rs`) for the lifecycle shape, and on the
//! lock-pointer contract spelled out directly in the specification: a
//! pointer object under `plugin=<id>/locks/<jobname>` carrying a TTL, taken
//! with an `ifMatch: "*"` precondition so two holders can never both
//! believe they hold the same job.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use objectdb_client::PutOptions;
use objectdb_errors::ObjectDbResult;
use objectdb_plugins::{ObjectDbPlugin, PluginHost, PluginMetadata, PluginStorage};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

fn lock_key(job_name: &str) -> String {
    format!("locks/{job_name}")
}

fn history_key(job_name: &str, at: DateTime<Utc>) -> String {
    format!("history/{job_name}/{}", at.timestamp_millis())
}

#[derive(Debug, Serialize, Deserialize)]
struct LockPayload {
    owner: String,
    acquired_at: DateTime<Utc>,
    ttl_seconds: u64,
}

impl LockPayload {
    fn expired(&self) -> bool {
        Utc::now() > self.acquired_at + chrono::Duration::seconds(self.ttl_seconds as i64)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryEntry {
    job_name: String,
    ran_at: DateTime<Utc>,
    success: bool,
    note: String,
}

/// A single job lock, released by dropping the guard or calling
/// [`SchedulerPlugin::release_lock`] explicitly.
pub struct LockOutcome {
    pub acquired: bool,
}

/// Demonstration scheduler: job locks plus run history, both confined to
/// `plugin=scheduler/...` via [`PluginStorage`]. Subscribes to no core
/// events (spec §6.3 "Scheduler ... subscribes to no core events").
pub struct SchedulerPlugin {
    owner_id: String,
    storage: RwLock<Option<PluginStorage>>,
}

impl SchedulerPlugin {
    pub fn new(owner_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { owner_id: owner_id.into(), storage: RwLock::new(None) })
    }

    fn storage(&self) -> PluginStorage {
        self.storage.read().clone().expect("SchedulerPlugin::setup must run before use")
    }

    /// Attempts to take the lock for `job_name`. Fails closed: a lock
    /// already held by someone else and not yet expired returns
    /// `acquired: false` rather than an error.
    pub async fn try_acquire_lock(&self, job_name: &str, ttl: Duration) -> ObjectDbResult<LockOutcome> {
        let storage = self.storage();
        let key = lock_key(job_name);
        let payload = LockPayload { owner: self.owner_id.clone(), acquired_at: Utc::now(), ttl_seconds: ttl.as_secs() };
        let body = serde_json::to_vec(&payload).expect("LockPayload always serializes");

        let fresh = storage.put(&key, body.clone(), HashMap::new(), PutOptions { if_match: Some("*".to_string()), content_type: None }).await;
        match fresh {
            Ok(()) => {
                debug!(job_name, owner = %self.owner_id, "acquired fresh job lock");
                return Ok(LockOutcome { acquired: true });
            }
            Err(objectdb_errors::ObjectDbError::AlreadyExists { .. }) => {}
            Err(err) => return Err(err),
        }

        let existing: LockPayload = match storage.get(&key).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or(LockPayload { owner: "<unparseable>".to_string(), acquired_at: Utc::now(), ttl_seconds: 0 }),
            Err(objectdb_errors::ObjectDbError::NotFound { .. }) => {
                // Raced with a concurrent release between the failed put and this read.
                return self.retry_after_clearing(&key, body).await;
            }
            Err(err) => return Err(err),
        };

        if !existing.expired() {
            debug!(job_name, held_by = %existing.owner, "job lock held by another owner, not expired");
            return Ok(LockOutcome { acquired: false });
        }

        info!(job_name, previous_owner = %existing.owner, "job lock expired, reclaiming");
        storage.delete(&key).await?;
        self.retry_after_clearing(&key, body).await
    }

    async fn retry_after_clearing(&self, key: &str, body: Vec<u8>) -> ObjectDbResult<LockOutcome> {
        let storage = self.storage();
        match storage.put(key, body, HashMap::new(), PutOptions { if_match: Some("*".to_string()), content_type: None }).await {
            Ok(()) => Ok(LockOutcome { acquired: true }),
            Err(objectdb_errors::ObjectDbError::AlreadyExists { .. }) => Ok(LockOutcome { acquired: false }),
            Err(err) => Err(err),
        }
    }

    pub async fn release_lock(&self, job_name: &str) -> ObjectDbResult<()> {
        self.storage().delete(&lock_key(job_name)).await
    }

    /// Appends a run record. There is no separate job-history resource
    /// object in the manifest sense — the history lives entirely under this
    /// plugin's own namespace, one object per run.
    pub async fn record_run(&self, job_name: &str, success: bool, note: impl Into<String>) -> ObjectDbResult<()> {
        let entry = HistoryEntry { job_name: job_name.to_string(), ran_at: Utc::now(), success, note: note.into() };
        let body = serde_json::to_vec(&entry).expect("HistoryEntry always serializes");
        self.storage().put(&history_key(job_name, entry.ran_at), body, HashMap::new(), objectdb_client::PutOptions::default()).await
    }
}

#[async_trait]
impl ObjectDbPlugin for SchedulerPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new("scheduler", "0.1.0")
    }

    async fn setup(&self, host: Arc<dyn PluginHost>) -> ObjectDbResult<()> {
        *self.storage.write() = Some(host.plugin_storage("scheduler"));
        Ok(())
    }

    async fn start(&self) -> ObjectDbResult<()> {
        info!("scheduler plugin started");
        Ok(())
    }

    async fn stop(&self) -> ObjectDbResult<()> {
        info!("scheduler plugin stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objectdb_core::{Database, DatabaseConfig};
    use std::time::Duration as StdDuration;

    fn fake_config() -> DatabaseConfig {
        DatabaseConfig { use_fake: true, connection_string: "s3://k:s@local/bucket/root".to_string(), ..DatabaseConfig::default() }
    }

    #[tokio::test]
    async fn second_acquirer_is_refused_while_lock_is_live() {
        let db = Database::new(fake_config());
        db.connect().await.unwrap();
        let plugin = SchedulerPlugin::new("node-a");
        db.use_plugin(plugin.clone()).await.unwrap();

        let first = plugin.try_acquire_lock("nightly-report", StdDuration::from_secs(60)).await.unwrap();
        assert!(first.acquired);

        let second = plugin.try_acquire_lock("nightly-report", StdDuration::from_secs(60)).await.unwrap();
        assert!(!second.acquired);
    }

    #[tokio::test]
    async fn expired_lock_can_be_reclaimed() {
        let db = Database::new(fake_config());
        db.connect().await.unwrap();
        let plugin = SchedulerPlugin::new("node-a");
        db.use_plugin(plugin.clone()).await.unwrap();

        let first = plugin.try_acquire_lock("hourly-sync", StdDuration::from_secs(0)).await.unwrap();
        assert!(first.acquired);

        tokio::time::sleep(StdDuration::from_millis(5)).await;
        let second = plugin.try_acquire_lock("hourly-sync", StdDuration::from_secs(60)).await.unwrap();
        assert!(second.acquired);
    }

    #[tokio::test]
    async fn release_then_reacquire_succeeds_immediately() {
        let db = Database::new(fake_config());
        db.connect().await.unwrap();
        let plugin = SchedulerPlugin::new("node-a");
        db.use_plugin(plugin.clone()).await.unwrap();

        plugin.try_acquire_lock("weekly-cleanup", StdDuration::from_secs(60)).await.unwrap();
        plugin.release_lock("weekly-cleanup").await.unwrap();
        let reacquired = plugin.try_acquire_lock("weekly-cleanup", StdDuration::from_secs(60)).await.unwrap();
        assert!(reacquired.acquired);
    }

    #[tokio::test]
    async fn record_run_persists_history_entries() {
        let db = Database::new(fake_config());
        db.connect().await.unwrap();
        let plugin = SchedulerPlugin::new("node-a");
        db.use_plugin(plugin.clone()).await.unwrap();

        plugin.record_run("nightly-report", true, "completed in 4.2s").await.unwrap();
        plugin.record_run("nightly-report", false, "destination unreachable").await.unwrap();
    }
}
