//! Client-side list filtering (spec §4.5 `list({limit, offset, filter})`).
//!
//! Deliberately attribute-equality only: selection is a predicate evaluated
//! against already-decoded pages, not a query language pushed down to the
//! store. Grounded on the shape of the teacher's
//! `DocumentFilter::matches_filter` (`aerolithdb-query/src/processing.rs`),
//! narrowed to the equality-only surface this spec names (no `$and`/`$or`/
//! `$gte` operators).

use objectdb_schema::{AttributeMap, AttributeValue};

#[derive(Debug, Clone, Default)]
pub struct Filter {
    equals: Vec<(String, AttributeValue)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: AttributeValue) -> Self {
        self.equals.push((field.into(), value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.equals.is_empty()
    }

    pub fn matches(&self, attributes: &AttributeMap) -> bool {
        self.equals.iter().all(|(field, expected)| attributes.get(field) == Some(expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, AttributeValue)]) -> AttributeMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(Filter::new().matches(&attrs(&[("status", AttributeValue::Str("new".into()))])));
    }

    #[test]
    fn matches_requires_every_clause_to_hold() {
        let filter = Filter::new().eq("status", AttributeValue::Str("paid".into())).eq("total", AttributeValue::Num(10.0));
        assert!(filter.matches(&attrs(&[
            ("status", AttributeValue::Str("paid".into())),
            ("total", AttributeValue::Num(10.0)),
        ])));
        assert!(!filter.matches(&attrs(&[
            ("status", AttributeValue::Str("paid".into())),
            ("total", AttributeValue::Num(11.0)),
        ])));
    }
}
