//! Sift core types: index elements, field values and search results.

#![forbid(unsafe_code)]

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod analysis;
pub mod error;
pub mod fields;

pub use error::{IndexError, IndexResult};
pub use fields::{FieldConfig, ValueKind};

/// Identity of an entity inside its type namespace.
///
/// Ordering is total: integers compare numerically and sort before all
/// textual ids, which compare lexicographically. Ranking ties and the
/// reindex uniqueness check both rely on it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ElementId {
    Int(i64),
    Text(String),
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementId::Int(n) => write!(f, "{}", n),
            ElementId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ElementId {
    fn from(v: i64) -> Self { ElementId::Int(v) }
}

impl From<i32> for ElementId {
    fn from(v: i32) -> Self { ElementId::Int(i64::from(v)) }
}

impl From<&str> for ElementId {
    fn from(v: &str) -> Self { ElementId::Text(v.to_string()) }
}

impl From<String> for ElementId {
    fn from(v: String) -> Self { ElementId::Text(v) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// No element with the same id may exist in the target generation.
    Insert,
    /// Replaces an existing element (delete followed by insert).
    Update,
    /// Removes an existing element.
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// A single field value. Variant order matters for untagged decoding:
/// RFC 3339 strings become dates before falling back to text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Date(DateTime<Utc>),
    Text(String),
}

impl FieldValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Bool(_) => ValueKind::Bool,
            FieldValue::Int(_) | FieldValue::Float(_) => ValueKind::Number,
            FieldValue::Date(_) => ValueKind::Date,
            FieldValue::Text(_) => ValueKind::Text,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Term rendering used for indexing and equality filters.
    pub fn render(&self) -> String {
        match self {
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Int(n) => n.to_string(),
            FieldValue::Float(x) => x.to_string(),
            FieldValue::Date(d) => d.timestamp_millis().to_string(),
            FieldValue::Text(s) => s.clone(),
        }
    }

    /// Convert a JSON value into a field value of the requested kind.
    /// Returns `None` when the JSON shape cannot represent that kind.
    pub fn from_json(kind: ValueKind, v: &serde_json::Value) -> Option<FieldValue> {
        use serde_json::Value;
        match (kind, v) {
            (ValueKind::Text, Value::String(s)) => Some(FieldValue::Text(s.clone())),
            (ValueKind::Text, Value::Number(n)) => Some(FieldValue::Text(n.to_string())),
            (ValueKind::Number, Value::Number(n)) => n
                .as_i64()
                .map(FieldValue::Int)
                .or_else(|| n.as_f64().map(FieldValue::Float)),
            (ValueKind::Number, Value::String(s)) => s
                .parse::<i64>()
                .map(FieldValue::Int)
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(FieldValue::Float)),
            (ValueKind::Date, Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|d| FieldValue::Date(d.with_timezone(&Utc))),
            (ValueKind::Date, Value::Number(n)) => n
                .as_i64()
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .map(FieldValue::Date),
            (ValueKind::Bool, Value::Bool(b)) => Some(FieldValue::Bool(*b)),
            _ => None,
        }
    }

    /// Ordering used by explicit sorts. Values of different kinds compare by kind.
    pub fn sort_cmp(&self, other: &FieldValue) -> std::cmp::Ordering {
        match (self, other) {
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a.cmp(b),
            (FieldValue::Int(a), FieldValue::Int(b)) => a.cmp(b),
            (FieldValue::Int(a), FieldValue::Float(b)) => (*a as f64).total_cmp(b),
            (FieldValue::Float(a), FieldValue::Int(b)) => a.total_cmp(&(*b as f64)),
            (FieldValue::Float(a), FieldValue::Float(b)) => a.total_cmp(b),
            (FieldValue::Date(a), FieldValue::Date(b)) => a.cmp(b),
            (FieldValue::Text(a), FieldValue::Text(b)) => a.cmp(b),
            (a, b) => (a.kind() as u8).cmp(&(b.kind() as u8)),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self { FieldValue::Text(v.to_string()) }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self { FieldValue::Text(v) }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self { FieldValue::Int(v) }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self { FieldValue::Int(i64::from(v)) }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self { FieldValue::Float(v) }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self { FieldValue::Bool(v) }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self { FieldValue::Date(v) }
}

/// `(field name, value)`; a name may repeat for multi-valued fields.
pub type FieldEntry = (String, FieldValue);

/// One unit of work for the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexElement {
    pub type_name: String,
    pub id: ElementId,
    pub operation: Operation,
    /// Language tag of the locale specific texts (`en`, `de-AT`, ...).
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub fields: SmallVec<[FieldEntry; 8]>,
}

impl IndexElement {
    pub fn new(type_name: impl Into<String>, id: impl Into<ElementId>, operation: Operation) -> Self {
        Self { type_name: type_name.into(), id: id.into(), operation, locale: None, fields: SmallVec::new() }
    }

    pub fn insert(type_name: impl Into<String>, id: impl Into<ElementId>) -> Self {
        Self::new(type_name, id, Operation::Insert)
    }

    pub fn update(type_name: impl Into<String>, id: impl Into<ElementId>) -> Self {
        Self::new(type_name, id, Operation::Update)
    }

    pub fn delete(type_name: impl Into<String>, id: impl Into<ElementId>) -> Self {
        Self::new(type_name, id, Operation::Delete)
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// All values carried for `name`, in insertion order.
    pub fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FieldValue> + 'a {
        self.fields.iter().filter(move |(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn first(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// A single search hit. `fields` holds stored fields only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    pub id: ElementId,
    pub score: f32,
    pub locale: Option<String>,
    pub fields: SmallVec<[FieldEntry; 8]>,
}

impl Hit {
    pub fn first(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// A page of results plus the number of matches irrespective of the page window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult<T> {
    pub results: Vec<T>,
    pub total_hits: usize,
}

impl<T> SearchResult<T> {
    pub fn new(results: Vec<T>, total_hits: usize) -> Self {
        debug_assert!(total_hits >= results.len());
        Self { results, total_hits }
    }

    pub fn empty() -> Self { Self { results: Vec::new(), total_hits: 0 } }

    pub fn len(&self) -> usize { self.results.len() }
    pub fn is_empty(&self) -> bool { self.results.is_empty() }

    /// Shape every result, keeping the total.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> SearchResult<U> {
        SearchResult { results: self.results.into_iter().map(f).collect(), total_hits: self.total_hits }
    }

    /// Shape results with a fallible conversion. Results that fail to convert are
    /// dropped from the page; the total is left untouched.
    pub fn filter_map<U>(self, f: impl FnMut(T) -> Option<U>) -> SearchResult<U> {
        SearchResult { results: self.results.into_iter().filter_map(f).collect(), total_hits: self.total_hits }
    }
}

pub mod prelude {
    pub use super::{
        ElementId, FieldEntry, FieldValue, Hit, IndexElement, Operation, SearchResult,
    };
    pub use super::error::{IndexError, IndexResult};
    pub use super::fields::{FieldConfig, ValueKind};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_ids_order_ints_before_text() {
        let mut ids = vec![ElementId::from("b"), ElementId::from(10), ElementId::from("a"), ElementId::from(2)];
        ids.sort();
        assert_eq!(ids, vec![ElementId::Int(2), ElementId::Int(10), ElementId::from("a"), ElementId::from("b")]);
    }

    #[test]
    fn multi_valued_fields_keep_order() {
        let e = IndexElement::insert("news", 1).with_field("in", 7).with_field("title", "x").with_field("in", 9);
        let vals: Vec<_> = e.values("in").cloned().collect();
        assert_eq!(vals, vec![FieldValue::Int(7), FieldValue::Int(9)]);
        assert_eq!(e.first("title"), Some(&FieldValue::from("x")));
    }

    #[test]
    fn first_value_outlives_the_lookup_key() {
        let e = IndexElement::insert("news", 1).with_field("title", "storm");
        let value = {
            let key = String::from("title");
            e.first(&key)
        };
        assert_eq!(value, Some(&FieldValue::from("storm")));
    }

    #[test]
    fn from_json_respects_kind() {
        let v = serde_json::json!("2020-01-02T03:04:05Z");
        assert!(matches!(FieldValue::from_json(ValueKind::Date, &v), Some(FieldValue::Date(_))));
        assert_eq!(FieldValue::from_json(ValueKind::Text, &v), Some(FieldValue::from("2020-01-02T03:04:05Z")));
        assert_eq!(FieldValue::from_json(ValueKind::Number, &serde_json::json!(3)), Some(FieldValue::Int(3)));
        assert_eq!(FieldValue::from_json(ValueKind::Bool, &serde_json::json!("yes")), None);
    }

    #[test]
    fn float_render_drops_integral_fraction() {
        assert_eq!(FieldValue::Float(4.0).render(), "4");
        assert_eq!(FieldValue::Float(4.5).render(), "4.5");
    }

    #[test]
    fn search_result_map_keeps_total() {
        let r = SearchResult::new(vec![1, 2], 9).map(|n| n * 10);
        assert_eq!(r.results, vec![10, 20]);
        assert_eq!(r.total_hits, 9);
    }
}
