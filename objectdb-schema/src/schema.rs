//! Compiled schemas: field descriptors, validation, coercion, and evolution.

use crate::rule::{parse_rule_tokens, RuleToken};
use crate::value::{AttributeMap, AttributeValue, FieldType};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid rule token: {0}")]
    InvalidRule(String),
    #[error("field '{0}' declares 'object' type without a nested schema")]
    MissingNestedSchema(String),
    #[error("field '{0}' declares 'items' without an 'array' type")]
    ItemsWithoutArray(String),
}

/// One error surfaced from `Schema::validate` (spec §4.3).
#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (expected {}, got {})", self.field, self.message, self.expected, self.actual)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<FieldError>,
}

impl ValidationReport {
    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A value that has passed `Schema::validate`. The only way to obtain one is
/// through validation, so a function taking `Validated<AttributeMap>` cannot
/// be called with an unchecked map (spec §9 DESIGN NOTES).
#[derive(Debug, Clone)]
pub struct Validated<T>(T);

impl<T> Validated<T> {
    pub fn into_inner(self) -> T {
        self.0
    }

    pub fn get(&self) -> &T {
        &self.0
    }
}

/// One compiled field: its type, modifiers, and (for `object`/`array` of
/// objects) a nested schema.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<AttributeValue>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub check_email: bool,
    pub check_url: bool,
    pub items_rule: Option<String>,
    pub nested: Option<Box<Schema>>,
}

impl FieldDescriptor {
    pub fn is_secret(&self) -> bool {
        self.field_type == FieldType::Secret
    }
}

/// An uncompiled field specification as supplied to `Database::createResource`
/// / `Resource::updateAttributes`: a rule string plus, for `object` fields,
/// a nested rule map.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FieldSpec {
    pub rule: String,
    pub nested: Option<BTreeMap<String, FieldSpec>>,
}

impl FieldSpec {
    pub fn new(rule: impl Into<String>) -> Self {
        Self { rule: rule.into(), nested: None }
    }

    pub fn object(rule: impl Into<String>, nested: BTreeMap<String, FieldSpec>) -> Self {
        Self { rule: rule.into(), nested: Some(nested) }
    }
}

pub type SchemaDef = BTreeMap<String, FieldSpec>;

/// A monotonically increasing schema version identifier (`v0`, `v1`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct SchemaVersion(pub u32);

impl SchemaVersion {
    pub fn initial() -> Self {
        SchemaVersion(0)
    }

    pub fn next(self) -> Self {
        SchemaVersion(self.0 + 1)
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.strip_prefix('v').and_then(|n| n.parse::<u32>().ok()).map(SchemaVersion)
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// One compiled, immutable schema version (spec §4.3). `Schema`s are never
/// mutated after `compile`; evolution produces a new `Schema` at the next
/// version, never edits this one.
#[derive(Debug, Clone)]
pub struct Schema {
    pub version: SchemaVersion,
    pub fields: BTreeMap<String, FieldDescriptor>,
}

fn compile_field(name: &str, spec: &FieldSpec) -> Result<FieldDescriptor, SchemaError> {
    let tokens = parse_rule_tokens(&spec.rule)?;

    let mut field_type = FieldType::String;
    let mut saw_type = false;
    let mut required = false;
    let mut saw_optional = false;
    let mut default = None;
    let mut min = None;
    let mut max = None;
    let mut min_length = None;
    let mut max_length = None;
    let mut check_email = false;
    let mut check_url = false;
    let mut items_rule = None;

    for token in tokens {
        match token {
            RuleToken::Type(ft) => {
                field_type = ft;
                saw_type = true;
            }
            RuleToken::Required => required = true,
            RuleToken::Optional => saw_optional = true,
            RuleToken::Default(raw) => default = Some(AttributeValue::Str(raw)),
            RuleToken::Min(n) => min = Some(n),
            RuleToken::Max(n) => max = Some(n),
            RuleToken::MinLength(n) => min_length = Some(n),
            RuleToken::MaxLength(n) => max_length = Some(n),
            RuleToken::Email => check_email = true,
            RuleToken::Url => check_url = true,
            RuleToken::Items(inner) => items_rule = Some(inner),
        }
    }
    let _ = saw_type;
    if saw_optional {
        required = false;
    }
    if field_type == FieldType::Email {
        check_email = true;
    }
    if field_type == FieldType::Url {
        check_url = true;
    }

    let nested = match &spec.nested {
        Some(nested_def) => {
            if field_type.storage_type() != FieldType::Object {
                return Err(SchemaError::MissingNestedSchema(name.to_string()));
            }
            Some(Box::new(Schema::compile(SchemaVersion::initial(), nested_def)?))
        }
        None => {
            if field_type.storage_type() == FieldType::Object {
                return Err(SchemaError::MissingNestedSchema(name.to_string()));
            }
            None
        }
    };

    if items_rule.is_some() && field_type.storage_type() != FieldType::Array {
        return Err(SchemaError::ItemsWithoutArray(name.to_string()));
    }

    Ok(FieldDescriptor {
        name: name.to_string(),
        field_type,
        required,
        default,
        min,
        max,
        min_length,
        max_length,
        check_email,
        check_url,
        items_rule,
        nested,
    })
}

/// `added`/`removed`/`retyped` field names between two schema versions,
/// consumed by `updateAttributes` (spec §4.3).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub retyped: Vec<String>,
}

impl Schema {
    pub fn compile(version: SchemaVersion, def: &SchemaDef) -> Result<Self, SchemaError> {
        let mut fields = BTreeMap::new();
        for (name, spec) in def {
            fields.insert(name.clone(), compile_field(name, spec)?);
        }
        Ok(Schema { version, fields })
    }

    pub fn diff(&self, previous: &Schema) -> SchemaDiff {
        let mut diff = SchemaDiff::default();
        for name in self.fields.keys() {
            if !previous.fields.contains_key(name) {
                diff.added.push(name.clone());
            }
        }
        for name in previous.fields.keys() {
            if !self.fields.contains_key(name) {
                diff.removed.push(name.clone());
            }
        }
        for (name, field) in &self.fields {
            if let Some(prev_field) = previous.fields.get(name) {
                if prev_field.field_type != field.field_type {
                    diff.retyped.push(name.clone());
                }
            }
        }
        diff
    }

    /// Applies defaults, returning a new map. Must run before `validate`.
    pub fn coerce(&self, record: &AttributeMap) -> AttributeMap {
        let mut out = record.clone();
        for (name, field) in &self.fields {
            let entry = out.get(name).cloned();
            let missing_or_null = matches!(entry, None | Some(AttributeValue::Null));
            if missing_or_null {
                if let Some(default) = &field.default {
                    out.insert(name.clone(), coerce_scalar(default, field.field_type));
                    continue;
                }
            }
            if let Some(value) = out.get(name).cloned() {
                out.insert(name.clone(), coerce_value(&value, field));
            }
        }
        out
    }

    /// Validates a (already-coerced) record against this schema.
    pub fn validate(&self, record: &AttributeMap) -> Result<Validated<AttributeMap>, ValidationReport> {
        let mut errors = Vec::new();
        for (name, field) in &self.fields {
            let value = record.get(name);
            validate_field(name, field, value, &mut errors);
        }
        if errors.is_empty() {
            Ok(Validated(record.clone()))
        } else {
            Err(ValidationReport { errors })
        }
    }
}

fn coerce_scalar(value: &AttributeValue, field_type: FieldType) -> AttributeValue {
    if let AttributeValue::Str(raw) = value {
        coerce_string_literal(raw, field_type)
    } else {
        value.clone()
    }
}

fn coerce_string_literal(raw: &str, field_type: FieldType) -> AttributeValue {
    match field_type.storage_type() {
        FieldType::Number => raw.parse::<f64>().map(AttributeValue::Num).unwrap_or(AttributeValue::Str(raw.to_string())),
        FieldType::Boolean => raw.parse::<bool>().map(AttributeValue::Bool).unwrap_or(AttributeValue::Str(raw.to_string())),
        FieldType::Date => chrono::DateTime::parse_from_rfc3339(raw)
            .map(|dt| AttributeValue::Time(dt.with_timezone(&chrono::Utc)))
            .unwrap_or(AttributeValue::Str(raw.to_string())),
        _ => AttributeValue::Str(raw.to_string()),
    }
}

/// Best-effort type coercion: a numeric string becomes a number when the
/// field expects one, etc. Values that already match, or that cannot be
/// coerced, pass through unchanged for `validate` to judge.
fn coerce_value(value: &AttributeValue, field: &FieldDescriptor) -> AttributeValue {
    match value {
        AttributeValue::Str(raw) => coerce_string_literal(raw, field.field_type),
        AttributeValue::Object(map) => {
            if let Some(nested) = &field.nested {
                AttributeValue::Object(nested.coerce(map))
            } else {
                value.clone()
            }
        }
        AttributeValue::Array(items) => {
            if let Some(rule) = &field.items_rule {
                let item_field = compile_field(&field.name, &FieldSpec::new(rule)).ok();
                if let Some(item_field) = item_field {
                    return AttributeValue::Array(items.iter().map(|v| coerce_value(v, &item_field)).collect());
                }
            }
            value.clone()
        }
        other => other.clone(),
    }
}

fn storage_type_matches(value: &AttributeValue, field_type: FieldType) -> bool {
    match field_type.storage_type() {
        FieldType::String => matches!(value, AttributeValue::Str(_)),
        FieldType::Number => matches!(value, AttributeValue::Num(_)),
        FieldType::Boolean => matches!(value, AttributeValue::Bool(_)),
        FieldType::Date => matches!(value, AttributeValue::Time(_)),
        FieldType::Object => matches!(value, AttributeValue::Object(_)),
        FieldType::Array => matches!(value, AttributeValue::Array(_)),
        _ => false,
    }
}

fn validate_field(name: &str, field: &FieldDescriptor, value: Option<&AttributeValue>, errors: &mut Vec<FieldError>) {
    let value = match value {
        None | Some(AttributeValue::Null) => {
            if field.required {
                errors.push(FieldError {
                    field: name.to_string(),
                    message: "required field is missing".to_string(),
                    expected: field.field_type.as_str().to_string(),
                    actual: "missing".to_string(),
                });
            }
            return;
        }
        Some(v) => v,
    };

    if !storage_type_matches(value, field.field_type) {
        errors.push(FieldError {
            field: name.to_string(),
            message: "type mismatch".to_string(),
            expected: field.field_type.as_str().to_string(),
            actual: value.type_name().to_string(),
        });
        return;
    }

    if let Some(min) = field.min {
        if let Some(n) = value.as_num() {
            if n < min {
                errors.push(FieldError {
                    field: name.to_string(),
                    message: format!("value below minimum {min}"),
                    expected: format!(">= {min}"),
                    actual: n.to_string(),
                });
            }
        }
    }
    if let Some(max) = field.max {
        if let Some(n) = value.as_num() {
            if n > max {
                errors.push(FieldError {
                    field: name.to_string(),
                    message: format!("value above maximum {max}"),
                    expected: format!("<= {max}"),
                    actual: n.to_string(),
                });
            }
        }
    }

    let length = match value {
        AttributeValue::Str(s) => Some(s.chars().count()),
        AttributeValue::Array(items) => Some(items.len()),
        _ => None,
    };
    if let Some(len) = length {
        if let Some(min_len) = field.min_length {
            if len < min_len {
                errors.push(FieldError {
                    field: name.to_string(),
                    message: format!("length below minimum {min_len}"),
                    expected: format!(">= {min_len} chars"),
                    actual: len.to_string(),
                });
            }
        }
        if let Some(max_len) = field.max_length {
            if len > max_len {
                errors.push(FieldError {
                    field: name.to_string(),
                    message: format!("length above maximum {max_len}"),
                    expected: format!("<= {max_len} chars"),
                    actual: len.to_string(),
                });
            }
        }
    }

    if field.check_email {
        if let Some(s) = value.as_str() {
            if !crate::format::EMAIL_RE.is_match(s) {
                errors.push(FieldError {
                    field: name.to_string(),
                    message: "not a valid email address".to_string(),
                    expected: "email".to_string(),
                    actual: s.to_string(),
                });
            }
        }
    }
    if field.check_url {
        if let Some(s) = value.as_str() {
            if !crate::format::URL_RE.is_match(s) {
                errors.push(FieldError {
                    field: name.to_string(),
                    message: "not a valid url".to_string(),
                    expected: "url".to_string(),
                    actual: s.to_string(),
                });
            }
        }
    }

    if field.field_type.storage_type() == FieldType::Object {
        if let (Some(nested_schema), AttributeValue::Object(map)) = (&field.nested, value) {
            if let Err(report) = nested_schema.validate(map) {
                for mut err in report.errors {
                    err.field = format!("{name}.{}", err.field);
                    errors.push(err);
                }
            }
        }
    }

    if field.field_type.storage_type() == FieldType::Array {
        if let (Some(rule), AttributeValue::Array(items)) = (&field.items_rule, value) {
            if let Ok(item_field) = compile_field(name, &FieldSpec::new(rule)) {
                for (idx, item) in items.iter().enumerate() {
                    let mut item_errors = Vec::new();
                    validate_field(&format!("{name}[{idx}]"), &item_field, Some(item), &mut item_errors);
                    errors.extend(item_errors);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(pairs: &[(&str, &str)]) -> SchemaDef {
        pairs.iter().map(|(n, r)| (n.to_string(), FieldSpec::new(*r))).collect()
    }

    #[test]
    fn validate_rejects_missing_required_field() {
        let schema = Schema::compile(SchemaVersion::initial(), &def(&[("status", "string|required")])).unwrap();
        let report = schema.validate(&AttributeMap::new()).unwrap_err();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].field, "status");
    }

    #[test]
    fn coerce_applies_default_before_validate() {
        let schema =
            Schema::compile(SchemaVersion::initial(), &def(&[("tier", "string|default:free")])).unwrap();
        let coerced = schema.coerce(&AttributeMap::new());
        assert_eq!(coerced.get("tier"), Some(&AttributeValue::Str("free".to_string())));
        assert!(schema.validate(&coerced).is_ok());
    }

    #[test]
    fn coerce_parses_numeric_strings_for_number_fields() {
        let schema = Schema::compile(SchemaVersion::initial(), &def(&[("total", "number|required")])).unwrap();
        let mut record = AttributeMap::new();
        record.insert("total".to_string(), AttributeValue::Str("42".to_string()));
        let coerced = schema.coerce(&record);
        assert_eq!(coerced.get("total"), Some(&AttributeValue::Num(42.0)));
    }

    #[test]
    fn email_rule_rejects_malformed_address() {
        let schema = Schema::compile(SchemaVersion::initial(), &def(&[("contact", "email|required")])).unwrap();
        let mut record = AttributeMap::new();
        record.insert("contact".to_string(), AttributeValue::Str("not-an-email".to_string()));
        assert!(schema.validate(&record).is_err());
    }

    #[test]
    fn diff_reports_added_removed_retyped() {
        let v0 = Schema::compile(
            SchemaVersion::initial(),
            &def(&[("status", "string|required"), ("legacy", "string|optional")]),
        )
        .unwrap();
        let v1 = Schema::compile(
            SchemaVersion(1),
            &def(&[("status", "number|required"), ("tax", "number|optional")]),
        )
        .unwrap();
        let diff = v1.diff(&v0);
        assert_eq!(diff.added, vec!["tax".to_string()]);
        assert_eq!(diff.removed, vec!["legacy".to_string()]);
        assert_eq!(diff.retyped, vec!["status".to_string()]);
    }

    #[test]
    fn nested_object_schema_validates_sub_fields() {
        let mut nested = BTreeMap::new();
        nested.insert("city".to_string(), FieldSpec::new("string|required"));
        let top = def(&[]);
        let mut top = top;
        top.insert("address".to_string(), FieldSpec::object("object|required", nested));
        let schema = Schema::compile(SchemaVersion::initial(), &top).unwrap();

        let mut record = AttributeMap::new();
        record.insert("address".to_string(), AttributeValue::Object(BTreeMap::new()));
        let report = schema.validate(&record).unwrap_err();
        assert_eq!(report.errors[0].field, "address.city");
    }

    #[test]
    fn array_items_rule_validates_each_element() {
        let schema =
            Schema::compile(SchemaVersion::initial(), &def(&[("tags", "array|items:string")])).unwrap();
        let mut record = AttributeMap::new();
        record.insert("tags".to_string(), AttributeValue::Array(vec![AttributeValue::Num(1.0)]));
        let report = schema.validate(&record).unwrap_err();
        assert_eq!(report.errors[0].field, "tags[0]");
    }
}
