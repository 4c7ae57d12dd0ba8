//! Field configurations for index types.
//!
//! A type describes each indexable attribute once; the configuration is
//! immutable after the type is registered. Constructors cover the usual
//! shapes:
//! - `text`: tokenized free text (titles, descriptions)
//! - `keyword`: a single exact term (links, slugs, codes)
//! - `number`, `date`, `bool`: exact scalar terms
//! - `stored_only`: returned with hits, never searched

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::FieldValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Text,
    Number,
    Date,
    Bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "kind")]
    pub value_kind: ValueKind,
    #[serde(default = "yes")]
    pub indexed: bool,
    #[serde(default = "yes")]
    pub stored: bool,
    /// Tokenize with the locale analyzer. Only meaningful for text fields.
    #[serde(default)]
    pub analyzed: bool,
}

fn yes() -> bool { true }

impl FieldConfig {
    pub fn new(name: impl Into<String>, value_kind: ValueKind, indexed: bool, stored: bool, analyzed: bool) -> Self {
        Self { name: name.into(), value_kind, indexed, stored, analyzed: analyzed && value_kind == ValueKind::Text }
    }

    pub fn text(name: impl Into<String>) -> Self { Self::new(name, ValueKind::Text, true, true, true) }
    pub fn keyword(name: impl Into<String>) -> Self { Self::new(name, ValueKind::Text, true, true, false) }
    pub fn number(name: impl Into<String>) -> Self { Self::new(name, ValueKind::Number, true, true, false) }
    pub fn date(name: impl Into<String>) -> Self { Self::new(name, ValueKind::Date, true, true, false) }
    pub fn bool(name: impl Into<String>) -> Self { Self::new(name, ValueKind::Bool, true, true, false) }
    pub fn stored_only(name: impl Into<String>, value_kind: ValueKind) -> Self {
        Self::new(name, value_kind, false, true, false)
    }

    /// Same field, but not returned with hits.
    pub fn unstored(mut self) -> Self {
        self.stored = false;
        self
    }

    pub fn accepts(&self, v: &FieldValue) -> bool { v.kind() == self.value_kind }
}

/// Look up a field by name in an ordered field list.
pub fn find<'a>(fields: &'a [FieldConfig], name: &str) -> Option<&'a FieldConfig> {
    fields.iter().find(|f| f.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyzed_only_applies_to_text() {
        let f = FieldConfig::new("n", ValueKind::Number, true, true, true);
        assert!(!f.analyzed);
        assert!(FieldConfig::text("t").analyzed);
        assert!(!FieldConfig::keyword("k").analyzed);
    }

    #[test]
    fn accepts_checks_kind() {
        let f = FieldConfig::number("providerId");
        assert!(f.accepts(&FieldValue::Int(3)));
        assert!(f.accepts(&FieldValue::Float(3.5)));
        assert!(!f.accepts(&FieldValue::from("3")));
    }

    #[test]
    fn deserializes_with_defaults() {
        let f: FieldConfig = serde_json::from_value(serde_json::json!({"name": "title", "kind": "text", "analyzed": true})).unwrap();
        assert_eq!(f, FieldConfig::text("title"));
    }
}
