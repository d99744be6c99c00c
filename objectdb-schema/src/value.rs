//! The attribute value model.
//!
//! Replaces the source's untyped attribute maps (§9 DESIGN NOTES: "dynamic
//! attribute bags") with a closed enum of scalar/composite variants. Every
//! record attribute, schema default, and codec round-trip passes through
//! this type rather than a bare `serde_json::Value`.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// One attribute value. `BTreeMap` (not `HashMap`) for `Object` so that two
/// structurally equal records compare equal regardless of insertion order,
/// matching the round-trip law in spec §8 ("ignoring ordering of unordered
/// maps").
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Str(String),
    Num(f64),
    Bool(bool),
    Time(DateTime<Utc>),
    Bytes(Vec<u8>),
    Object(BTreeMap<String, AttributeValue>),
    Array(Vec<AttributeValue>),
    Null,
}

pub type AttributeMap = BTreeMap<String, AttributeValue>;

impl AttributeValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::Str(_) => "string",
            AttributeValue::Num(_) => "number",
            AttributeValue::Bool(_) => "boolean",
            AttributeValue::Time(_) => "date",
            AttributeValue::Bytes(_) => "bytes",
            AttributeValue::Object(_) => "object",
            AttributeValue::Array(_) => "array",
            AttributeValue::Null => "null",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            AttributeValue::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[AttributeValue]> {
        match self {
            AttributeValue::Array(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, AttributeValue>> {
        match self {
            AttributeValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }
}

/// Lossless conversion to `serde_json::Value`, used by the codec for body
/// serialization and by the CLI for pretty-printing. `Bytes` has no native
/// JSON representation, so it round-trips through base64.
impl From<&AttributeValue> for serde_json::Value {
    fn from(value: &AttributeValue) -> Self {
        use serde_json::Value as J;
        match value {
            AttributeValue::Str(s) => J::String(s.clone()),
            AttributeValue::Num(n) => serde_json::Number::from_f64(*n).map(J::Number).unwrap_or(J::Null),
            AttributeValue::Bool(b) => J::Bool(*b),
            AttributeValue::Time(t) => J::String(t.to_rfc3339()),
            AttributeValue::Bytes(b) => J::String(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b)),
            AttributeValue::Object(map) => {
                J::Object(map.iter().map(|(k, v)| (k.clone(), v.into())).collect())
            }
            AttributeValue::Array(items) => J::Array(items.iter().map(Into::into).collect()),
            AttributeValue::Null => J::Null,
        }
    }
}

impl From<serde_json::Value> for AttributeValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as J;
        match value {
            J::Null => AttributeValue::Null,
            J::Bool(b) => AttributeValue::Bool(b),
            J::Number(n) => AttributeValue::Num(n.as_f64().unwrap_or(0.0)),
            J::String(s) => AttributeValue::Str(s),
            J::Array(items) => AttributeValue::Array(items.into_iter().map(Into::into).collect()),
            J::Object(map) => {
                AttributeValue::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// Field types named by the rule vocabulary (spec §3). `Secret`, `Email`,
/// and `Url` are string subtypes: they imply `String` storage plus an extra
/// validation/encoding behavior (encryption, format check).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Object,
    Array,
    Secret,
    Url,
    Email,
}

impl FieldType {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "string" => Some(FieldType::String),
            "number" => Some(FieldType::Number),
            "boolean" => Some(FieldType::Boolean),
            "date" => Some(FieldType::Date),
            "object" => Some(FieldType::Object),
            "array" => Some(FieldType::Array),
            "secret" => Some(FieldType::Secret),
            "url" => Some(FieldType::Url),
            "email" => Some(FieldType::Email),
            _ => None,
        }
    }

    /// The underlying storage representation a subtype resolves to.
    pub fn storage_type(self) -> FieldType {
        match self {
            FieldType::Secret | FieldType::Url | FieldType::Email => FieldType::String,
            other => other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Object => "object",
            FieldType::Array => "array",
            FieldType::Secret => "secret",
            FieldType::Url => "url",
            FieldType::Email => "email",
        }
    }
}
