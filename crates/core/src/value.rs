use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Name of the identity field every editable row must carry.
pub const ID_COLUMN: &str = "id";

/// A single cell as seen by the browser engine.
///
/// Row stores hand their native values over in this shape so the rest of the
/// engine never has to inspect raw dynamic data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum CellValue {
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
    Json(Map<String, Value>),
    Array(Vec<Value>),
}

pub type Row = BTreeMap<String, CellValue>;

impl CellValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(number) => number.as_f64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(number) => number.as_i64(),
            _ => None,
        }
    }

    /// Text used by substring search; structured values search their JSON form.
    #[must_use]
    pub fn search_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Text(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Number(number) => write!(f, "{number}"),
            Self::Text(text) => f.write_str(text),
            Self::Json(object) => write!(f, "{}", Value::Object(object.clone())),
            Self::Array(items) => write!(f, "{}", Value::Array(items.clone())),
        }
    }
}

impl From<Value> for CellValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(value) => Self::Bool(value),
            Value::Number(number) => Self::Number(number),
            Value::String(text) => Self::Text(text),
            Value::Object(object) => Self::Json(object),
            Value::Array(items) => Self::Array(items),
        }
    }
}

impl From<CellValue> for Value {
    fn from(value: CellValue) -> Self {
        match value {
            CellValue::Null => Value::Null,
            CellValue::Bool(value) => Value::Bool(value),
            CellValue::Number(number) => Value::Number(number),
            CellValue::Text(text) => Value::String(text),
            CellValue::Json(object) => Value::Object(object),
            CellValue::Array(items) => Value::Array(items),
        }
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        Self::Number(Number::from(value))
    }
}

impl From<u64> for CellValue {
    fn from(value: u64) -> Self {
        Self::Number(Number::from(value))
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        Number::from_f64(value).map_or(Self::Null, Self::Number)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Converts a JSON object into a row; any other JSON shape is rejected.
#[must_use]
pub fn row_from_json(value: Value) -> Option<Row> {
    let Value::Object(object) = value else {
        return None;
    };
    Some(
        object
            .into_iter()
            .map(|(name, value)| (name, CellValue::from(value)))
            .collect(),
    )
}

#[must_use]
pub fn row_to_json(row: &Row) -> Value {
    Value::Object(
        row.iter()
            .map(|(name, value)| (name.clone(), Value::from(value.clone())))
            .collect(),
    )
}

/// Identity of a row, if it exposes a non-null `id` field.
#[must_use]
pub fn row_id(row: &Row) -> Option<&CellValue> {
    row.get(ID_COLUMN).filter(|value| !value.is_null())
}
