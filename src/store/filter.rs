use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{code, Document, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum Direction {
    #[serde(rename = "asc")]
    Ascending,
    #[default]
    #[serde(rename = "desc")]
    Descending,
}

impl Direction {
    pub fn to_order(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }

    /// Orients an ascending comparison.
    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            Self::Ascending => ordering,
            Self::Descending => ordering.reverse(),
        }
    }
}

/// A single constraint of a `list` call.
///
/// `id` and `created_at` address the document's identity and creation time; every other name
/// addresses a field.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Equal(String, Value),
    NotEqual(String, Value),
    /// Matches when the field equals any of the values.
    EqualAny(String, Vec<Value>),
    OrderBy(String, Direction),
    /// Only documents strictly after the document with this id, in the requested order.
    CursorAfter(String),
    /// Restricts the returned fields. `id` and `created_at` are always returned.
    Select(Vec<String>),
}

impl Filter {
    pub fn equal(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equal(field.into(), value.into())
    }

    pub fn not_equal(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::NotEqual(field.into(), value.into())
    }

    pub fn equal_any<V: Into<Value>>(
        field: impl Into<String>, values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::EqualAny(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn newest_first() -> Self {
        Self::OrderBy(CREATED_AT.to_string(), Direction::Descending)
    }

    pub fn cursor_after(id: impl Into<String>) -> Self {
        Self::CursorAfter(id.into())
    }

    pub fn select<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self::Select(fields.into_iter().map(Into::into).collect())
    }
}

pub const ID: &str = "id";
pub const CREATED_AT: &str = "created_at";

/// A field condition of a normalized query.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equal(String, Value),
    NotEqual(String, Value),
    EqualAny(String, Vec<Value>),
}

impl Condition {
    pub fn field(&self) -> &str {
        match self {
            Self::Equal(field, _) | Self::NotEqual(field, _) | Self::EqualAny(field, _) => field,
        }
    }

    pub fn matches(&self, document: &Document) -> bool {
        let actual = document.field(self.field()).unwrap_or(Value::Null);
        match self {
            Self::Equal(_, expected) => actual == *expected,
            Self::NotEqual(_, expected) => actual != *expected,
            Self::EqualAny(_, expected) => expected.contains(&actual),
        }
    }
}

/// The filters of a `list` call, validated and grouped by role.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub conditions: Vec<Condition>,
    pub order: (String, Direction),
    pub cursor: Option<String>,
    pub projection: Option<Vec<String>>,
}

impl Query {
    /// Documents are ordered by creation time, oldest first, unless a filter says otherwise.
    pub fn parse(filters: &[Filter]) -> Result<Self, StoreError> {
        let mut conditions = Vec::new();
        let mut order = None;
        let mut cursor = None;
        let mut projection = None;

        for filter in filters {
            match filter {
                Filter::Equal(field, value) => {
                    conditions.push(Condition::Equal(checked(field)?, value.clone()))
                }
                Filter::NotEqual(field, value) => {
                    conditions.push(Condition::NotEqual(checked(field)?, value.clone()))
                }
                Filter::EqualAny(field, values) => {
                    conditions.push(Condition::EqualAny(checked(field)?, values.clone()))
                }
                Filter::OrderBy(field, direction) => {
                    if order.replace((checked(field)?, *direction)).is_some() {
                        return Err(bad_request("more than one ordering was requested"));
                    }
                }
                Filter::CursorAfter(id) => {
                    if cursor.replace(id.clone()).is_some() {
                        return Err(bad_request("more than one cursor was given"));
                    }
                }
                Filter::Select(fields) => {
                    let fields = fields.iter().map(|field| checked(field));
                    projection = Some(fields.collect::<Result<_, _>>()?);
                }
            }
        }

        Ok(Query {
            conditions,
            order: order.unwrap_or_else(|| (CREATED_AT.to_string(), Direction::Ascending)),
            cursor,
            projection,
        })
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.conditions.iter().all(|condition| condition.matches(document))
    }

    /// Total order of the query: the ordering field, then the document id.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let (field, direction) = &self.order;
        let by_field = compare_values(
            &a.field(field).unwrap_or(Value::Null),
            &b.field(field).unwrap_or(Value::Null),
        );
        direction.apply(by_field.then_with(|| a.id.cmp(&b.id)))
    }

    pub fn project(&self, mut document: Document) -> Document {
        if let Some(fields) = &self.projection {
            document.fields.retain(|name, _| fields.contains(name));
        }
        document
    }
}

/// Orders JSON values: null, booleans, numbers, strings, then everything else as equal.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) | Value::Object(_) => 4,
        }
    }

    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Field names end up inside query text, so only plain identifiers are accepted.
fn checked(field: &str) -> Result<String, StoreError> {
    let mut chars = field.chars();
    let valid = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(field.to_string())
    } else {
        Err(bad_request(format!("`{field}` is not a valid field name")))
    }
}

#[track_caller]
fn bad_request(message: impl Into<String>) -> StoreError {
    StoreError::new(code::BAD_REQUEST, message)
}
