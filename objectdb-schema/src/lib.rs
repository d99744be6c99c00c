//! Rule-string schema parsing, validation, coercion, and version evolution
//! (spec §4.3). Standalone: no dependency on storage, codec, or resource
//! crates, so schemas can be compiled and tested in isolation.

mod format;
mod rule;
mod schema;
mod value;

pub use rule::{parse_rule_tokens, RuleToken};
pub use schema::{
    FieldDescriptor, FieldSpec, Schema, SchemaDef, SchemaDiff, SchemaError, SchemaVersion,
    Validated, ValidationReport,
};
pub use schema::FieldError;
pub use value::{AttributeMap, AttributeValue, FieldType};
