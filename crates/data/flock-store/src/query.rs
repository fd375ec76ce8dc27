//! Filters, sort keys and ordered range queries

use crate::document::{CollectionName, Document};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Field every ordered query sorts on (descending)
pub const ORDER_FIELD: &str = "date";

/// Position in the feed order.
///
/// The derived `Ord` compares `date` then `id`; feeds walk it in
/// descending order, so ties on `date` fall back to id-descending.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SortKey {
    pub date: i64,
    pub id: String,
}

impl SortKey {
    pub fn new(date: i64, id: impl Into<String>) -> Self {
        Self { date, id: id.into() }
    }

    /// Whether `self` comes strictly after `other` in the descending feed
    pub fn is_after(&self, other: &SortKey) -> bool {
        self < other
    }
}

/// Predicate over a single document field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldFilter {
    /// Field equals value
    Eq { field: String, value: Value },
    /// Field equals any of the values
    In { field: String, values: Vec<Value> },
    /// String field starts with prefix, case-insensitive
    Prefix { field: String, prefix: String },
}

impl FieldFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FieldFilter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn any_of<I, S>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Value>,
    {
        FieldFilter::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn prefix(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        FieldFilter::Prefix {
            field: field.into(),
            prefix: prefix.into(),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            FieldFilter::Eq { field, .. }
            | FieldFilter::In { field, .. }
            | FieldFilter::Prefix { field, .. } => field,
        }
    }

    /// Evaluate against a document (used by in-process stores)
    pub fn matches(&self, doc: &Document) -> bool {
        let Some(actual) = doc.field(self.field()) else {
            return false;
        };
        match self {
            FieldFilter::Eq { value, .. } => actual == value,
            FieldFilter::In { values, .. } => values.iter().any(|v| v == actual),
            FieldFilter::Prefix { prefix, .. } => actual
                .as_str()
                .map(|s| s.to_lowercase().starts_with(&prefix.to_lowercase()))
                .unwrap_or(false),
        }
    }
}

/// A range query ordered by `(date, id)` descending
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedQuery {
    pub collection: CollectionName,
    pub filter: FieldFilter,
    pub limit: usize,
}

impl OrderedQuery {
    pub fn new(collection: CollectionName, filter: FieldFilter, limit: usize) -> Self {
        Self {
            collection,
            filter,
            limit,
        }
    }
}

/// One batch of an ordered query
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub items: Vec<Document>,

    /// Key of the last item, `None` when the batch is empty
    pub next: Option<SortKey>,
}

impl QueryPage {
    pub fn from_items(items: Vec<Document>) -> Self {
        let next = items.last().map(Document::sort_key);
        Self { items, next }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Total order over JSON scalars for `query_by` sorting
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}
