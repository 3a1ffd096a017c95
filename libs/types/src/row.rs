//! Grid rows and row identity
//!
//! A `Row` is an ordered field map plus one reserved identity field holding
//! its `RowKey`. The key comes from message metadata, never from the field
//! contents, and is only used for matching updates to existing rows.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Name of the reserved identity field when a row is serialized.
pub const IDENTITY_FIELD: &str = "_key";

/// Stable, opaque identity of a record within one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowKey(String);

impl RowKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RowKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// One grid row: identity plus fields ordered by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    #[serde(rename = "_key")]
    key: RowKey,
    #[serde(flatten)]
    fields: BTreeMap<String, Value>,
}

impl Row {
    /// Create an empty row with the given identity.
    pub fn new(key: RowKey) -> Self {
        Self {
            key,
            fields: BTreeMap::new(),
        }
    }

    /// Build a row from an identity and a set of fields.
    ///
    /// A field named like the reserved identity field is ignored.
    pub fn from_fields<I, K, V>(key: RowKey, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| k != IDENTITY_FIELD)
            .collect();
        Self { key, fields }
    }

    /// Builder-style field setter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        if name != IDENTITY_FIELD {
            self.fields.insert(name, value.into());
        }
        self
    }

    pub fn key(&self) -> &RowKey {
        &self.key
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field-wise merge of an incoming partial row over this one.
    ///
    /// Incoming non-null fields win. Fields the incoming row omits, or sends
    /// as null, keep their current value. A null for a field this row does
    /// not have yet is recorded so the column exists.
    pub fn merged_with(&self, incoming: &Row) -> Row {
        let mut fields = self.fields.clone();
        for (name, value) in &incoming.fields {
            if value.is_null() {
                fields.entry(name.clone()).or_insert(Value::Null);
            } else {
                fields.insert(name.clone(), value.clone());
            }
        }
        Row {
            key: self.key.clone(),
            fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn ibm() -> Row {
        Row::new(RowKey::new("IBM"))
            .with("symbol", "IBM")
            .with("bid", 100)
            .with("ask", 101)
    }

    #[test]
    fn test_partial_merge_retains_omitted_fields() {
        let update = Row::new(RowKey::new("IBM")).with("symbol", "IBM").with("bid", 102);
        let merged = ibm().merged_with(&update);

        assert_eq!(merged.get("bid"), Some(&Value::from(102)));
        assert_eq!(merged.get("ask"), Some(&Value::from(101)));
        assert_eq!(merged.get("symbol"), Some(&Value::from("IBM")));
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_merge_null_does_not_erase() {
        let update = Row::new(RowKey::new("IBM"))
            .with("ask", Value::Null)
            .with("venue", Value::Null);
        let merged = ibm().merged_with(&update);

        assert_eq!(merged.get("ask"), Some(&Value::from(101)));
        assert_eq!(merged.get("venue"), Some(&Value::Null));
    }

    #[test]
    fn test_merge_keeps_original_key() {
        let update = Row::new(RowKey::new("other")).with("bid", 1);
        let merged = ibm().merged_with(&update);
        assert_eq!(merged.key().as_str(), "IBM");
    }

    #[test]
    fn test_identity_field_is_reserved() {
        let row = Row::from_fields(RowKey::new("k1"), vec![("_key", "spoofed"), ("a", "b")]);
        assert_eq!(row.len(), 1);
        assert_eq!(row.key().as_str(), "k1");

        let row = Row::new(RowKey::new("k1")).with(IDENTITY_FIELD, "spoofed");
        assert!(row.is_empty());
    }

    #[test]
    fn test_row_serialization() {
        let row = Row::new(RowKey::new("1")).with("price", Decimal::new(105, 1));
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"_key":"1","price":10.5}"#);

        let back: Row = serde_json::from_str(&json).unwrap();
        assert_eq!(back, row);
    }

    fn arb_fields() -> impl proptest::strategy::Strategy<Value = BTreeMap<String, Value>> {
        use proptest::prelude::*;
        proptest::collection::btree_map(
            "[a-e]",
            prop_oneof![Just(Value::Null), (-100i64..100).prop_map(Value::from)],
            0..5,
        )
    }

    proptest::proptest! {
        #[test]
        fn merge_keeps_every_field_and_prefers_incoming(
            current in arb_fields(),
            incoming in arb_fields(),
        ) {
            let key = RowKey::new("k");
            let base = Row::from_fields(key.clone(), current.clone());
            let update = Row::from_fields(key, incoming.clone());
            let merged = base.merged_with(&update);

            for (name, value) in &current {
                proptest::prop_assert!(merged.get(name).is_some());
                if incoming.get(name).map(Value::is_null).unwrap_or(true) {
                    proptest::prop_assert_eq!(merged.get(name), Some(value));
                }
            }
            for (name, value) in &incoming {
                if !value.is_null() {
                    proptest::prop_assert_eq!(merged.get(name), Some(value));
                }
            }
            proptest::prop_assert_eq!(merged.key(), base.key());
        }
    }
}
