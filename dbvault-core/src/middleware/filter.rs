//! Equality and membership filters for table reads.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Filters keyed by column name; all must hold (AND).
pub type Filters = BTreeMap<String, FilterValue>;

/// The value a column is filtered on.
///
/// `Eq(Null)` renders as `IS NULL`; `In` with no values matches nothing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
    Eq(Value),
    In(Vec<Value>),
}

impl From<Value> for FilterValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(values) => Self::In(values),
            scalar => Self::Eq(scalar),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Eq(Value::from(value))
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Eq(Value::from(value))
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Eq(Value::from(value))
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        Self::Eq(Value::from(value))
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        Self::Eq(Value::from(value))
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Eq(Value::from(value))
    }
}

impl<T: Into<Value>> From<Vec<T>> for FilterValue {
    fn from(values: Vec<T>) -> Self {
        Self::In(values.into_iter().map(Into::into).collect())
    }
}
