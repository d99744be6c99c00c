//! Attribute map <-> metadata/body encoding (spec §4.2).
//!
//! `encode_record`/`decode_record` dispatch on [`Behavior`] with free
//! functions rather than a class hierarchy (§9 DESIGN NOTES): four variants,
//! no trait objects needed for this axis.

use crate::behavior::Behavior;
use crate::compression::{maybe_compress, maybe_decompress};
use crate::crypto::{decrypt_field, encrypt_field};
use crate::CodecError;
use objectdb_schema::{AttributeMap, AttributeValue, FieldDescriptor, Schema};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct EncodedRecord {
    pub metadata: HashMap<String, String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct DecodedRecord {
    pub attributes: AttributeMap,
    pub user_payload: Option<Vec<u8>>,
}

fn encode_scalar(value: &AttributeValue) -> Result<String, CodecError> {
    Ok(match value {
        AttributeValue::Str(s) => format!("s:{s}"),
        AttributeValue::Num(n) => format!("n:{n}"),
        AttributeValue::Bool(b) => format!("b:{b}"),
        AttributeValue::Time(t) => format!("t:{}", t.to_rfc3339()),
        AttributeValue::Bytes(_) | AttributeValue::Object(_) | AttributeValue::Array(_) => {
            return encode_json(value)
        }
        AttributeValue::Null => String::new(),
    })
}

fn encode_json(value: &AttributeValue) -> Result<String, CodecError> {
    let json: serde_json::Value = value.into();
    Ok(format!("j:{}", serde_json::to_string(&json)?))
}

fn decode_tagged(raw: &str) -> Result<AttributeValue, CodecError> {
    let (tag, rest) = raw.split_at(raw.find(':').map(|i| i + 1).unwrap_or(0));
    match tag {
        "s:" => Ok(AttributeValue::Str(rest.to_string())),
        "n:" => rest.parse::<f64>().map(AttributeValue::Num).map_err(|_| CodecError::Malformed(raw.to_string())),
        "b:" => rest.parse::<bool>().map(AttributeValue::Bool).map_err(|_| CodecError::Malformed(raw.to_string())),
        "t:" => chrono::DateTime::parse_from_rfc3339(rest)
            .map(|dt| AttributeValue::Time(dt.with_timezone(&chrono::Utc)))
            .map_err(|_| CodecError::Malformed(raw.to_string())),
        "j:" => {
            let json: serde_json::Value = serde_json::from_str(rest)?;
            Ok(AttributeValue::from(json))
        }
        _ => Err(CodecError::Malformed(raw.to_string())),
    }
}

/// Encodes one field, dispatching to encryption for `secret` fields.
fn encode_field_value(field: &FieldDescriptor, value: &AttributeValue, encryption_key: &[u8]) -> Result<String, CodecError> {
    if field.is_secret() {
        let plaintext = value.as_str().ok_or_else(|| CodecError::Malformed(format!("secret field '{}' is not a string", field.name)))?;
        Ok(encrypt_field(encryption_key, &field.name, plaintext))
    } else {
        encode_scalar(value)
    }
}

fn decode_field_value(field: &FieldDescriptor, raw: &str, encryption_key: &[u8]) -> Result<AttributeValue, CodecError> {
    if field.is_secret() {
        decrypt_field(encryption_key, &field.name, raw).map(AttributeValue::Str)
    } else {
        decode_tagged(raw)
    }
}

/// Size of a candidate metadata entry, used to decide whether `mixed`
/// behavior keeps a field in metadata or spills it to the body.
fn entry_cost(key: &str, value: &str) -> usize {
    key.len() + value.len()
}

pub fn encode_record(
    schema: &Schema,
    behavior: Behavior,
    record: &AttributeMap,
    encryption_key: &[u8],
    metadata_budget: usize,
    compression_threshold: usize,
    user_payload: Option<&[u8]>,
) -> Result<EncodedRecord, CodecError> {
    let mut metadata = HashMap::new();
    let mut body_fields: Vec<(String, serde_json::Value)> = Vec::new();

    match behavior {
        Behavior::MetadataOnly | Behavior::UserManaged => {
            for (name, field) in &schema.fields {
                let Some(value) = record.get(name) else { continue };
                if value.is_null() {
                    continue;
                }
                metadata.insert(name.clone(), encode_field_value(field, value, encryption_key)?);
            }
        }
        Behavior::BodyOnly => {
            for (name, field) in &schema.fields {
                let Some(value) = record.get(name) else { continue };
                if value.is_null() {
                    continue;
                }
                let encoded = encode_field_value(field, value, encryption_key)?;
                body_fields.push((name.clone(), serde_json::Value::String(encoded)));
            }
        }
        Behavior::Mixed => {
            let mut running_total = 0usize;
            for (name, field) in &schema.fields {
                let Some(value) = record.get(name) else { continue };
                if value.is_null() {
                    continue;
                }
                let encoded = encode_field_value(field, value, encryption_key)?;
                let cost = entry_cost(name, &encoded);
                if running_total + cost <= metadata_budget {
                    running_total += cost;
                    metadata.insert(name.clone(), encoded);
                } else {
                    body_fields.push((name.clone(), serde_json::Value::String(encoded)));
                }
            }
        }
    }

    let body = match behavior {
        Behavior::UserManaged => maybe_compress(user_payload.unwrap_or(&[]).to_vec(), compression_threshold),
        Behavior::MetadataOnly => Vec::new(),
        Behavior::BodyOnly | Behavior::Mixed => {
            if body_fields.is_empty() {
                Vec::new()
            } else {
                let obj: serde_json::Map<String, serde_json::Value> = body_fields.into_iter().collect();
                let raw = serde_json::to_vec(&serde_json::Value::Object(obj))?;
                maybe_compress(raw, compression_threshold)
            }
        }
    };

    Ok(EncodedRecord { metadata, body })
}

pub fn decode_record(
    schema: &Schema,
    behavior: Behavior,
    metadata: &HashMap<String, String>,
    body: &[u8],
    encryption_key: &[u8],
) -> Result<DecodedRecord, CodecError> {
    let mut attributes = AttributeMap::new();

    match behavior {
        Behavior::MetadataOnly | Behavior::UserManaged => {
            for (name, field) in &schema.fields {
                if let Some(raw) = metadata.get(name) {
                    attributes.insert(name.clone(), decode_field_value(field, raw, encryption_key)?);
                }
            }
            let user_payload =
                if behavior == Behavior::UserManaged { Some(maybe_decompress(body)) } else { None };
            Ok(DecodedRecord { attributes, user_payload })
        }
        Behavior::BodyOnly => {
            let raw_body = maybe_decompress(body);
            let body_map: serde_json::Map<String, serde_json::Value> = if raw_body.is_empty() {
                serde_json::Map::new()
            } else {
                serde_json::from_slice(&raw_body)?
            };
            for (name, field) in &schema.fields {
                if let Some(serde_json::Value::String(raw)) = body_map.get(name) {
                    attributes.insert(name.clone(), decode_field_value(field, raw, encryption_key)?);
                }
            }
            Ok(DecodedRecord { attributes, user_payload: None })
        }
        Behavior::Mixed => {
            let raw_body = maybe_decompress(body);
            let body_map: serde_json::Map<String, serde_json::Value> = if raw_body.is_empty() {
                serde_json::Map::new()
            } else {
                serde_json::from_slice(&raw_body)?
            };
            for (name, field) in &schema.fields {
                if let Some(raw) = metadata.get(name) {
                    attributes.insert(name.clone(), decode_field_value(field, raw, encryption_key)?);
                } else if let Some(serde_json::Value::String(raw)) = body_map.get(name) {
                    attributes.insert(name.clone(), decode_field_value(field, raw, encryption_key)?);
                }
            }
            Ok(DecodedRecord { attributes, user_payload: None })
        }
    }
}
