//! Typed error taxonomy for the objectdb engine.
//!
//! Every failure the engine can surface to a caller is one of the kinds below.
//! Each kind carries a small typed context struct instead of a free-form string
//! bag, so callers can match on `resource`/`record_id`/`partition` without
//! parsing a message. `ObjectDbError::code()` returns the stable kind name used
//! in logs and metrics; `Display` renders a human-readable description.

use std::fmt;
use thiserror::Error;

/// Structured context attached to most error kinds.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ErrorContext {
    pub resource: Option<String>,
    pub record_id: Option<String>,
    pub partition: Option<String>,
    pub store_request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    pub fn with_store_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.store_request_id = Some(request_id.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(r) = &self.resource {
            parts.push(format!("resource={r}"));
        }
        if let Some(id) = &self.record_id {
            parts.push(format!("record_id={id}"));
        }
        if let Some(p) = &self.partition {
            parts.push(format!("partition={p}"));
        }
        if let Some(rid) = &self.store_request_id {
            parts.push(format!("store_request_id={rid}"));
        }
        write!(f, "{}", parts.join(", "))
    }
}

/// One error per schema-validated field.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    pub expected: String,
    pub actual: String,
}

/// Top-level error taxonomy (spec §7). Each variant is a "kind", not a type name.
#[derive(Error, Debug)]
pub enum ObjectDbError {
    #[error("validation failed: {0:?}")]
    ValidationFailed(Vec<FieldError>),

    #[error("not found ({context})")]
    NotFound { context: ErrorContext },

    #[error("already exists ({context})")]
    AlreadyExists { context: ErrorContext },

    #[error("unknown partition ({context})")]
    UnknownPartition { context: ErrorContext },

    #[error("schema version missing: {version} ({context})")]
    SchemaVersionMissing { version: String, context: ErrorContext },

    #[error("decryption failed ({context})")]
    DecryptionFailed { context: ErrorContext },

    #[error("object store unavailable: {message} ({context})")]
    StoreUnavailable {
        message: String,
        context: ErrorContext,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("object store rejected request: {message} ({context})")]
    StoreRejected { message: String, context: ErrorContext },

    #[error("operation cancelled ({context})")]
    Cancelled { context: ErrorContext },

    #[error("hook failed: {message} ({context})")]
    HookFailed { message: String, context: ErrorContext },

    #[error("plugin setup failed for {plugin_id}: {message}")]
    PluginSetupFailed { plugin_id: String, message: String },

    #[error("partition pointer stale ({context})")]
    PartitionPointerStale { context: ErrorContext },
}

impl ObjectDbError {
    /// Stable machine-readable kind name, independent of the `Display` message.
    pub fn code(&self) -> &'static str {
        match self {
            ObjectDbError::ValidationFailed(_) => "ValidationFailed",
            ObjectDbError::NotFound { .. } => "NotFound",
            ObjectDbError::AlreadyExists { .. } => "AlreadyExists",
            ObjectDbError::UnknownPartition { .. } => "UnknownPartition",
            ObjectDbError::SchemaVersionMissing { .. } => "SchemaVersionMissing",
            ObjectDbError::DecryptionFailed { .. } => "DecryptionFailed",
            ObjectDbError::StoreUnavailable { .. } => "StoreUnavailable",
            ObjectDbError::StoreRejected { .. } => "StoreRejected",
            ObjectDbError::Cancelled { .. } => "Cancelled",
            ObjectDbError::HookFailed { .. } => "HookFailed",
            ObjectDbError::PluginSetupFailed { .. } => "PluginSetupFailed",
            ObjectDbError::PartitionPointerStale { .. } => "PartitionPointerStale",
        }
    }

    pub fn not_found(context: ErrorContext) -> Self {
        ObjectDbError::NotFound { context }
    }

    pub fn already_exists(context: ErrorContext) -> Self {
        ObjectDbError::AlreadyExists { context }
    }

    pub fn store_unavailable(message: impl Into<String>, context: ErrorContext) -> Self {
        ObjectDbError::StoreUnavailable { message: message.into(), context, source: None }
    }
}

pub type ObjectDbResult<T> = Result<T, ObjectDbError>;
