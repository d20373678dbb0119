//! Column shape inference from a small sample of rows.
//!
//! Nothing here consults a catalog: every type, nullability flag and
//! foreign-key hint is guessed from the sampled values and column names.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::value::{CellValue, Row};

/// Non-null values per column that take part in type detection.
pub const DEFAULT_TYPE_SAMPLE_VALUES: usize = 10;

const FOREIGN_KEY_SUFFIX: &str = "_id";
const OWNER_COLUMN: &str = "user_id";
const UUID_LEN: usize = 36;

static ISO_DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\d{4}-\d{2}-\d{2}(?:[T ]\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?)?$",
    )
    .expect("date pattern is valid")
});

static UUID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
    )
    .expect("uuid pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Number,
    Boolean,
    Json,
    Array,
    Date,
    Uuid,
    String,
    Unknown,
}

impl ColumnType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Json => "json",
            Self::Array => "array",
            Self::Date => "date",
            Self::Uuid => "uuid",
            Self::String => "string",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candidate referenced table derived from a column name.
///
/// This is a naming-convention guess. `verified` stays `false` because no
/// catalog lookup ever backs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyHint {
    pub referenced_table: String,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub sample_value: CellValue,
    #[serde(default)]
    pub foreign_key: Option<ForeignKeyHint>,
    pub missing_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyLink {
    pub column: String,
    pub referenced_table: String,
}

#[must_use]
pub fn infer_columns(sample: &[Row]) -> Vec<ColumnMeta> {
    infer_columns_with(sample, DEFAULT_TYPE_SAMPLE_VALUES)
}

#[must_use]
pub fn infer_columns_with(sample: &[Row], type_sample_values: usize) -> Vec<ColumnMeta> {
    if sample.is_empty() {
        return Vec::new();
    }

    let names = sample
        .iter()
        .flat_map(|row| row.keys())
        .collect::<BTreeSet<_>>();
    let row_count = sample.len();

    names
        .into_iter()
        .map(|name| {
            let present = sample
                .iter()
                .filter_map(|row| row.get(name))
                .filter(|value| !value.is_null())
                .collect::<Vec<_>>();
            let non_null = present.len();
            let typed = &present[..non_null.min(type_sample_values)];

            ColumnMeta {
                name: name.clone(),
                column_type: classify_values(typed),
                nullable: non_null < row_count,
                sample_value: present.first().map_or(CellValue::Null, |&value| value.clone()),
                foreign_key: foreign_key_hint(name),
                missing_fraction: missing_fraction(row_count, non_null),
            }
        })
        .collect()
}

/// Picks the narrowest type every value agrees on; a single outlier falls
/// through to the next, more permissive category.
#[must_use]
pub fn classify_values(values: &[&CellValue]) -> ColumnType {
    if values.is_empty() {
        return ColumnType::Unknown;
    }

    let all = |predicate: fn(&CellValue) -> bool| values.iter().all(|value| predicate(value));

    if all(|value| matches!(value, CellValue::Number(_))) {
        ColumnType::Number
    } else if all(|value| matches!(value, CellValue::Bool(_))) {
        ColumnType::Boolean
    } else if all(|value| matches!(value, CellValue::Json(_))) {
        ColumnType::Json
    } else if all(|value| matches!(value, CellValue::Array(_))) {
        ColumnType::Array
    } else if all(|value| value.as_str().is_some_and(looks_like_date)) {
        ColumnType::Date
    } else if all(|value| value.as_str().is_some_and(looks_like_uuid)) {
        ColumnType::Uuid
    } else {
        ColumnType::String
    }
}

#[must_use]
pub fn looks_like_date(text: &str) -> bool {
    if !ISO_DATE_PATTERN.is_match(text) {
        return false;
    }

    DateTime::parse_from_rfc3339(text).is_ok()
        || ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"]
            .iter()
            .any(|format| DateTime::parse_from_str(text, format).is_ok())
        || [
            "%Y-%m-%dT%H:%M:%S%.f",
            "%Y-%m-%d %H:%M:%S%.f",
            "%Y-%m-%dT%H:%M",
            "%Y-%m-%d %H:%M",
        ]
        .iter()
        .any(|format| NaiveDateTime::parse_from_str(text, format).is_ok())
        || NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
}

#[must_use]
pub fn looks_like_uuid(text: &str) -> bool {
    text.len() == UUID_LEN && UUID_PATTERN.is_match(text)
}

/// `<base>_id` guesses `<base>s`; `user_id` is an ownership column, not a link.
///
/// Only the plain `s` plural is tried. Irregular plurals (`categories`,
/// `addresses`) are a known miss of the heuristic.
#[must_use]
pub fn foreign_key_hint(column_name: &str) -> Option<ForeignKeyHint> {
    if column_name == OWNER_COLUMN {
        return None;
    }
    let base = column_name.strip_suffix(FOREIGN_KEY_SUFFIX)?;
    if base.is_empty() {
        return None;
    }
    Some(ForeignKeyHint {
        referenced_table: format!("{base}s"),
        verified: false,
    })
}

#[must_use]
pub fn extract_foreign_keys(columns: &[ColumnMeta]) -> Vec<ForeignKeyLink> {
    columns
        .iter()
        .filter_map(|column| {
            foreign_key_hint(&column.name).map(|hint| ForeignKeyLink {
                column: column.name.clone(),
                referenced_table: hint.referenced_table,
            })
        })
        .collect()
}

/// Stable fingerprint of the column layout, used to tell durable entries apart.
#[must_use]
pub fn schema_signature(columns: &[ColumnMeta]) -> String {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let rendered = columns
        .iter()
        .map(|column| format!("{}:{}:{}", column.name, column.column_type, column.nullable))
        .collect::<Vec<_>>()
        .join("|");

    let hash = rendered.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    });
    format!("{hash:016x}")
}

#[allow(clippy::cast_precision_loss)]
fn missing_fraction(row_count: usize, non_null: usize) -> f64 {
    (row_count - non_null) as f64 / row_count as f64
}
