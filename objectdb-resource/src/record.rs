//! The materialized, caller-visible record shape (spec §3).

use chrono::{DateTime, Utc};
use objectdb_schema::{AttributeMap, SchemaVersion};

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub attributes: AttributeMap,
    pub version: SchemaVersion,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Time-sortable + random-suffix id: a millisecond timestamp in hex followed
/// by 8 random hex characters, so ids sort roughly by creation time while
/// staying collision-resistant across concurrent callers.
pub fn generate_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let mut suffix = [0u8; 4];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut suffix);
    format!("{millis:013x}{}", hex_encode(&suffix))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
