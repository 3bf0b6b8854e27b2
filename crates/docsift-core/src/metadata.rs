//! Document metadata: a closed variant type plus a forward-compatible bag.
//!
//! Metadata values are restricted to four shapes (text, number, timestamp,
//! text list). Anything a collaborator returns that is not declared in the
//! schema lands in the `extra` bag untouched, so new fields can ship before
//! they are promoted to first-class entries. Validation happens once, at
//! ingestion time; query code can then trust the shapes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SiftError, SiftResult};

/// A single metadata value.
///
/// Untagged on the wire: timestamps are RFC 3339 strings and are tried
/// before plain text, so `"2024-10-05T00:00:00Z"` round-trips as a
/// [`MetadataValue::Timestamp`] while `"pharmacy"` stays text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Timestamp(DateTime<Utc>),
    Number(f64),
    TextList(Vec<String>),
    Text(String),
}

impl MetadataValue {
    pub fn kind(&self) -> MetadataKind {
        match self {
            MetadataValue::Text(_) => MetadataKind::Text,
            MetadataValue::Number(_) => MetadataKind::Number,
            MetadataValue::Timestamp(_) => MetadataKind::Timestamp,
            MetadataValue::TextList(_) => MetadataKind::TextList,
        }
    }
}

/// Declared shape of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataKind {
    Text,
    Number,
    Timestamp,
    TextList,
}

/// Validated metadata attached to a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Schema-validated first-class fields.
    #[serde(default)]
    pub fields: BTreeMap<String, MetadataValue>,
    /// Pass-through values not yet promoted to first-class fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DocumentMetadata {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.extra.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.fields.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: MetadataValue) {
        self.fields.insert(key.into(), value);
    }

    /// Copy entries from `base` that this metadata does not already have.
    ///
    /// Used after enrichment: enriched values win, base (step-1) values
    /// fill the gaps.
    pub fn fill_missing_from(&mut self, base: &DocumentMetadata) {
        for (key, value) in &base.fields {
            self.fields
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        for (key, value) in &base.extra {
            self.extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

/// The schema enriched metadata is validated against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataSchema {
    pub fields: BTreeMap<String, MetadataKind>,
}

impl MetadataSchema {
    pub fn new(fields: BTreeMap<String, MetadataKind>) -> Self {
        Self { fields }
    }

    /// The schema used for personal documents when none is configured.
    pub fn standard() -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("author".to_string(), MetadataKind::Text);
        fields.insert("sender".to_string(), MetadataKind::Text);
        fields.insert("recipients".to_string(), MetadataKind::TextList);
        fields.insert("tags".to_string(), MetadataKind::TextList);
        fields.insert("amount".to_string(), MetadataKind::Number);
        fields.insert("document_date".to_string(), MetadataKind::Timestamp);
        fields.insert("language".to_string(), MetadataKind::Text);
        Self { fields }
    }

    /// Validate a raw structured map (as returned by the metadata
    /// enrichment collaborator) against this schema.
    ///
    /// Declared keys must coerce to their declared kind or the whole
    /// result is rejected; undeclared keys pass through to `extra`.
    pub fn validate(&self, raw: &serde_json::Value) -> SiftResult<DocumentMetadata> {
        let map = raw
            .as_object()
            .ok_or_else(|| SiftError::Validation("metadata must be a JSON object".to_string()))?;

        let mut out = DocumentMetadata::default();
        for (key, value) in map {
            if value.is_null() {
                continue;
            }
            match self.fields.get(key) {
                Some(kind) => {
                    let coerced = coerce(key, value, *kind)?;
                    out.fields.insert(key.clone(), coerced);
                }
                None => {
                    out.extra.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(out)
    }
}

fn coerce(key: &str, value: &serde_json::Value, kind: MetadataKind) -> SiftResult<MetadataValue> {
    let mismatch = || {
        SiftError::Validation(format!(
            "field '{}' expected {:?}, got {}",
            key, kind, value
        ))
    };

    match kind {
        MetadataKind::Text => value
            .as_str()
            .map(|s| MetadataValue::Text(s.to_string()))
            .ok_or_else(mismatch),
        MetadataKind::Number => value
            .as_f64()
            .map(MetadataValue::Number)
            .ok_or_else(mismatch),
        MetadataKind::Timestamp => value
            .as_str()
            .and_then(|s| s.parse::<DateTime<Utc>>().ok())
            .map(MetadataValue::Timestamp)
            .ok_or_else(mismatch),
        MetadataKind::TextList => {
            let arr = value.as_array().ok_or_else(mismatch)?;
            let mut items = Vec::with_capacity(arr.len());
            for entry in arr {
                items.push(entry.as_str().ok_or_else(mismatch)?.to_string());
            }
            Ok(MetadataValue::TextList(items))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_declared_fields() {
        let schema = MetadataSchema::standard();
        let raw = json!({
            "sender": "pharmacy@example.com",
            "amount": 42.10,
            "tags": ["receipt", "health"],
            "document_date": "2024-10-05T00:00:00Z",
        });
        let meta = schema.validate(&raw).unwrap();
        assert_eq!(
            meta.get("sender"),
            Some(&MetadataValue::Text("pharmacy@example.com".into()))
        );
        assert_eq!(meta.get("amount"), Some(&MetadataValue::Number(42.10)));
        assert_eq!(
            meta.get("tags"),
            Some(&MetadataValue::TextList(vec![
                "receipt".into(),
                "health".into()
            ]))
        );
        assert!(matches!(
            meta.get("document_date"),
            Some(MetadataValue::Timestamp(_))
        ));
    }

    #[test]
    fn test_undeclared_fields_go_to_extra() {
        let schema = MetadataSchema::standard();
        let raw = json!({ "sender": "a@b.c", "page_count": 3 });
        let meta = schema.validate(&raw).unwrap();
        assert!(meta.get("page_count").is_none());
        assert_eq!(meta.extra.get("page_count"), Some(&json!(3)));
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let schema = MetadataSchema::standard();
        let raw = json!({ "amount": "not a number" });
        let err = schema.validate(&raw).unwrap_err();
        assert!(matches!(err, SiftError::Validation(_)));
    }

    #[test]
    fn test_non_object_is_rejected() {
        let schema = MetadataSchema::standard();
        assert!(schema.validate(&json!("just a string")).is_err());
        assert!(schema.validate(&json!([1, 2, 3])).is_err());
    }

    #[test]
    fn test_null_values_are_skipped() {
        let schema = MetadataSchema::standard();
        let meta = schema.validate(&json!({ "sender": null })).unwrap();
        assert!(meta.is_empty());
    }

    #[test]
    fn test_fill_missing_keeps_enriched_values() {
        let mut enriched = DocumentMetadata::default();
        enriched.insert("sender", MetadataValue::Text("enriched".into()));

        let mut base = DocumentMetadata::default();
        base.insert("sender", MetadataValue::Text("base".into()));
        base.insert("language", MetadataValue::Text("en".into()));

        enriched.fill_missing_from(&base);
        assert_eq!(
            enriched.get("sender"),
            Some(&MetadataValue::Text("enriched".into()))
        );
        assert_eq!(
            enriched.get("language"),
            Some(&MetadataValue::Text("en".into()))
        );
    }

    #[test]
    fn test_value_roundtrip_through_json() {
        let mut meta = DocumentMetadata::default();
        meta.insert("sender", MetadataValue::Text("a@b.c".into()));
        meta.insert("amount", MetadataValue::Number(12.5));
        meta.insert(
            "document_date",
            MetadataValue::Timestamp("2024-10-05T00:00:00Z".parse().unwrap()),
        );
        meta.insert(
            "tags",
            MetadataValue::TextList(vec!["x".into(), "y".into()]),
        );

        let text = serde_json::to_string(&meta).unwrap();
        let back: DocumentMetadata = serde_json::from_str(&text).unwrap();
        assert_eq!(meta, back);
    }
}
