//! Entity identifiers and tag maps.
//!
//! IDs are 128-bit values rendered in the canonical 36-character hyphenated
//! form. They are issued on first persistence; a backend may supply its own
//! id when one has not been assigned yet. Comparison is case-insensitive.
//!
//! Tag values keep their original type but compare after string coercion of
//! both sides, so `{"a": 0}` and `{"a": "0"}` match the same filter across
//! backends.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// An opaque, globally unique entity identifier.
///
/// Stored in canonical lowercase form; equality and hashing are
/// case-insensitive by construction because parsing normalizes case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Issue a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse an identifier from its textual form.
    ///
    /// Accepts any case; the stored form is normalized to lowercase so
    /// comparisons across backends behave case-insensitively.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let uuid = Uuid::parse_str(s).map_err(|_| crate::Error::InvalidId(s.to_string()))?;
        Ok(Self(uuid.to_string()))
    }

    /// The canonical 36-character hyphenated text form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tag value: stored as its original type, compared after string coercion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl TagValue {
    /// The string coercion used for cross-backend tag equality.
    ///
    /// Integral floats render without a trailing `.0` so `2.0` and `2`
    /// coerce to the same string.
    pub fn coerced(&self) -> String {
        match self {
            TagValue::String(s) => s.clone(),
            TagValue::Int(i) => i.to_string(),
            TagValue::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{}", *f as i64)
                } else {
                    f.to_string()
                }
            }
            TagValue::Bool(b) => b.to_string(),
        }
    }
}

impl PartialEq for TagValue {
    fn eq(&self, other: &Self) -> bool {
        self.coerced() == other.coerced()
    }
}

impl Eq for TagValue {}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.coerced())
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        TagValue::String(s.to_string())
    }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self {
        TagValue::String(s)
    }
}

impl From<i64> for TagValue {
    fn from(i: i64) -> Self {
        TagValue::Int(i)
    }
}

impl From<i32> for TagValue {
    fn from(i: i32) -> Self {
        TagValue::Int(i as i64)
    }
}

impl From<f64> for TagValue {
    fn from(f: f64) -> Self {
        TagValue::Float(f)
    }
}

impl From<bool> for TagValue {
    fn from(b: bool) -> Self {
        TagValue::Bool(b)
    }
}

/// Tag map carried by every entity.
///
/// `BTreeMap` keeps serialization deterministic across runs and restarts.
pub type TagMap = BTreeMap<String, TagValue>;

/// A single tag filter: a literal compared after coercion, or a predicate
/// over the coerced value.
#[derive(Clone)]
pub enum TagFilter {
    /// Matches when the coerced tag value equals the coerced literal.
    Literal(TagValue),
    /// Matches when the predicate accepts the coerced tag value.
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl fmt::Debug for TagFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagFilter::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            TagFilter::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl TagFilter {
    /// Test a single tag value against this filter.
    pub fn matches(&self, value: &TagValue) -> bool {
        match self {
            TagFilter::Literal(expected) => expected.coerced() == value.coerced(),
            TagFilter::Predicate(pred) => pred(&value.coerced()),
        }
    }
}

macro_rules! literal_tag_filter {
    ($($ty:ty),+) => {
        $(impl From<$ty> for TagFilter {
            fn from(v: $ty) -> Self {
                TagFilter::Literal(v.into())
            }
        })+
    };
}

literal_tag_filter!(TagValue, &str, String, i64, i32, f64, bool);

/// A conjunctive set of tag filters keyed by tag name.
#[derive(Debug, Clone, Default)]
pub struct TagQuery {
    filters: BTreeMap<String, TagFilter>,
}

impl TagQuery {
    /// Create an empty query (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter for a tag key, replacing any existing filter on it.
    pub fn with(mut self, key: impl Into<String>, filter: impl Into<TagFilter>) -> Self {
        self.filters.insert(key.into(), filter.into());
        self
    }

    /// Returns true when every filter key is present in `tags` and matches.
    pub fn matches(&self, tags: &TagMap) -> bool {
        self.filters.iter().all(|(key, filter)| {
            tags.get(key).map(|value| filter.matches(value)).unwrap_or(false)
        })
    }

    /// Number of filters in the query.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// True when the query has no filters.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}
