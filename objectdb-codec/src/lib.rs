//! Attribute encode/decode, per-field encryption, and body compression
//! (spec §4.2). Depends only on `objectdb-schema` for field descriptors;
//! knows nothing about the object store or the resource pipeline.

mod behavior;
mod codec;
mod compression;
mod crypto;

pub use behavior::Behavior;
pub use codec::{decode_record, encode_record, DecodedRecord, EncodedRecord};
pub use compression::DEFAULT_COMPRESSION_THRESHOLD_BYTES;
pub use crypto::{decrypt_field, encrypt_field};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed encoded value: {0}")]
    Malformed(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("decryption failed")]
    DecryptionFailed,
}

impl From<CodecError> for objectdb_errors::ObjectDbError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::DecryptionFailed => {
                objectdb_errors::ObjectDbError::DecryptionFailed { context: objectdb_errors::ErrorContext::new() }
            }
            other => objectdb_errors::ObjectDbError::StoreRejected {
                message: other.to_string(),
                context: objectdb_errors::ErrorContext::new(),
            },
        }
    }
}
