//! Layered configuration (spec's ambient config section), following the
//! teacher's precedence order (`aerolithdb-core::config::AerolithsConfig::load`:
//! file, then environment, then defaults) but built on the `config` crate
//! instead of hand-rolled file parsing, and rounded out with `clap` in the
//! `objectdb-cli` binary for command-line overrides.

use std::time::Duration;

use objectdb_cost::PricingTable;
use serde::{Deserialize, Serialize};

fn default_behavior() -> String {
    "mixed".to_string()
}

fn default_metadata_budget() -> usize {
    2000
}

fn default_compression_threshold() -> usize {
    10 * 1024
}

fn default_concurrency_cap() -> usize {
    64
}

/// Bounded-attempt, capped-backoff retry policy for manifest writes and
/// transient store failures (spec §5 "bounded attempts, capped backoff").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, base_delay_ms: 20, max_delay_ms: 500 }
    }
}

impl RetryPolicy {
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let millis = self.base_delay_ms.saturating_mul(1u64 << attempt.min(16)).min(self.max_delay_ms);
        Duration::from_millis(millis)
    }
}

/// Root configuration for a `Database` instance. Loaded via [`DatabaseConfig::load`]
/// from (in ascending precedence) built-in defaults, an optional `objectdb.toml`/
/// `objectdb.json` file in the working directory, and `OBJECTDB_*` environment
/// variables — the same file-then-env-then-default layering the teacher's
/// `AerolithsConfig::load` used, via the `config` crate instead of hand-rolled
/// parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub connection_string: String,
    #[serde(default)]
    pub use_fake: bool,
    /// Base64 (or raw-bytes-as-string) encryption key for `Secret` fields;
    /// empty means secret fields round-trip in plaintext (fine for `useFake`
    /// development, rejected by a production deployment's own policy, not
    /// enforced by the engine itself).
    #[serde(default)]
    pub encryption_key: String,
    #[serde(default = "default_behavior")]
    pub default_behavior: String,
    #[serde(default = "default_metadata_budget")]
    pub metadata_budget_bytes: usize,
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold_bytes: usize,
    /// Caps in-flight object-store calls per `Database` instance (spec §5).
    #[serde(default = "default_concurrency_cap")]
    pub concurrency_cap: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub pricing: PricingTable,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection_string: "s3://fake:fake@local/objectdb/root".to_string(),
            use_fake: true,
            encryption_key: String::new(),
            default_behavior: default_behavior(),
            metadata_budget_bytes: default_metadata_budget(),
            compression_threshold_bytes: default_compression_threshold(),
            concurrency_cap: default_concurrency_cap(),
            retry: RetryPolicy::default(),
            pricing: PricingTable::default(),
        }
    }
}

impl DatabaseConfig {
    /// Layers, lowest to highest precedence: built-in defaults, an optional
    /// `objectdb.toml`/`objectdb.json` in the current directory, then
    /// `OBJECTDB_*` environment variables (e.g. `OBJECTDB_CONCURRENCY_CAP=32`).
    pub fn load() -> Result<Self, config::ConfigError> {
        let defaults = Self::default();
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&defaults)?)
            .add_source(config::File::with_name("objectdb").required(false))
            .add_source(config::Environment::with_prefix("OBJECTDB").separator("_"));
        builder.build()?.try_deserialize()
    }

    pub fn behavior(&self) -> objectdb_codec::Behavior {
        objectdb_codec::Behavior::parse(&self.default_behavior).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy { max_attempts: 5, base_delay_ms: 20, max_delay_ms: 200 };
        assert_eq!(policy.backoff_for(0), Duration::from_millis(20));
        assert_eq!(policy.backoff_for(10), Duration::from_millis(200));
    }

    #[test]
    fn default_behavior_parses_to_mixed() {
        assert_eq!(DatabaseConfig::default().behavior(), objectdb_codec::Behavior::Mixed);
    }
}
