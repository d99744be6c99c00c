//! Per-database cost accounting.
//!
//! `CostAccountant` aggregates request counts and byte totals reported by the
//! `ObjectClient` after every completed call. It never affects operation
//! results — `report()` cannot fail and returns nothing. A `Database` owns one
//! instance and hands an `Arc` clone to its `ObjectClient`; there is no global
//! singleton.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

/// The object-store command an accounted call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StoreCommand {
    Put,
    Get,
    Head,
    Delete,
    List,
    DeleteBatch,
}

impl StoreCommand {
    fn as_str(&self) -> &'static str {
        match self {
            StoreCommand::Put => "put",
            StoreCommand::Get => "get",
            StoreCommand::Head => "head",
            StoreCommand::Delete => "delete",
            StoreCommand::List => "list",
            StoreCommand::DeleteBatch => "delete_batch",
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
struct CommandTotals {
    count: u64,
    request_bytes: u64,
    response_bytes: u64,
}

/// Per-tier, per-request pricing, expressed in fractional cents per unit so
/// the accountant can stay integer-free without floating point drift on
/// large counters. Defaults approximate common S3-compatible pricing tiers
/// and are meant to be overridden by deployments that know their contract.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PricingTable {
    pub cents_per_put: f64,
    pub cents_per_get: f64,
    pub cents_per_head: f64,
    pub cents_per_delete: f64,
    pub cents_per_list: f64,
    pub cents_per_gb_stored: f64,
    pub cents_per_gb_transferred: f64,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            cents_per_put: 0.0005,
            cents_per_get: 0.00004,
            cents_per_head: 0.00004,
            cents_per_delete: 0.0,
            cents_per_list: 0.0005,
            cents_per_gb_stored: 2.3,
            cents_per_gb_transferred: 9.0,
        }
    }
}

/// A point-in-time view of accumulated cost, safe to serialize and ship to a
/// metrics exporter.
#[derive(Debug, Clone, Serialize)]
pub struct CostSnapshot {
    pub request_counts: HashMap<String, u64>,
    pub total_requests: u64,
    pub total_request_bytes: u64,
    pub total_response_bytes: u64,
    pub estimated_stored_bytes: i64,
    pub estimated_cost_cents: f64,
}

#[derive(Debug, Default)]
struct Inner {
    totals: HashMap<StoreCommand, CommandTotals>,
    estimated_stored_bytes: i64,
}

/// Owned by `Database`; cloned cheaply behind an `Arc` into every `ObjectClient`.
#[derive(Debug)]
pub struct CostAccountant {
    inner: Mutex<Inner>,
    pricing: PricingTable,
}

impl CostAccountant {
    pub fn new(pricing: PricingTable) -> Self {
        Self { inner: Mutex::new(Inner::default()), pricing }
    }

    /// Record one completed object-store call. Called by `ObjectClient` after
    /// every request, success or failure — cost is accrued regardless of
    /// outcome since the store still billed the request.
    pub fn report(&self, command: StoreCommand, request_bytes: u64, response_bytes: u64) {
        let mut inner = self.inner.lock();
        let entry = inner.totals.entry(command).or_default();
        entry.count += 1;
        entry.request_bytes += request_bytes;
        entry.response_bytes += response_bytes;
        if command == StoreCommand::Put {
            inner.estimated_stored_bytes += request_bytes as i64;
        } else if command == StoreCommand::Delete || command == StoreCommand::DeleteBatch {
            inner.estimated_stored_bytes -= request_bytes as i64;
        }
    }

    pub fn snapshot(&self) -> CostSnapshot {
        let inner = self.inner.lock();
        let mut request_counts = HashMap::new();
        let mut total_requests = 0u64;
        let mut total_request_bytes = 0u64;
        let mut total_response_bytes = 0u64;
        let mut estimated_cost_cents = 0.0;

        for (cmd, totals) in inner.totals.iter() {
            request_counts.insert(cmd.as_str().to_string(), totals.count);
            total_requests += totals.count;
            total_request_bytes += totals.request_bytes;
            total_response_bytes += totals.response_bytes;
            estimated_cost_cents += totals.count as f64 * self.cents_per_request(*cmd);
        }

        let transferred_gb =
            (total_request_bytes + total_response_bytes) as f64 / 1024.0 / 1024.0 / 1024.0;
        estimated_cost_cents += transferred_gb * self.pricing.cents_per_gb_transferred;

        let stored_gb = inner.estimated_stored_bytes.max(0) as f64 / 1024.0 / 1024.0 / 1024.0;
        estimated_cost_cents += stored_gb * self.pricing.cents_per_gb_stored;

        CostSnapshot {
            request_counts,
            total_requests,
            total_request_bytes,
            total_response_bytes,
            estimated_stored_bytes: inner.estimated_stored_bytes,
            estimated_cost_cents,
        }
    }

    fn cents_per_request(&self, command: StoreCommand) -> f64 {
        match command {
            StoreCommand::Put => self.pricing.cents_per_put,
            StoreCommand::Get => self.pricing.cents_per_get,
            StoreCommand::Head => self.pricing.cents_per_head,
            StoreCommand::Delete | StoreCommand::DeleteBatch => self.pricing.cents_per_delete,
            StoreCommand::List => self.pricing.cents_per_list,
        }
    }
}

impl Default for CostAccountant {
    fn default() -> Self {
        Self::new(PricingTable::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_purely_additive() {
        let acct = CostAccountant::default();
        acct.report(StoreCommand::Put, 1024, 0);
        acct.report(StoreCommand::Get, 0, 2048);
        let snap = acct.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.total_request_bytes, 1024);
        assert_eq!(snap.total_response_bytes, 2048);
        assert_eq!(snap.estimated_stored_bytes, 1024);
        assert!(snap.estimated_cost_cents > 0.0);
    }

    #[test]
    fn delete_reduces_estimated_stored_bytes() {
        let acct = CostAccountant::default();
        acct.report(StoreCommand::Put, 500, 0);
        acct.report(StoreCommand::Delete, 500, 0);
        assert_eq!(acct.snapshot().estimated_stored_bytes, 0);
    }
}
