//! Domain models shared by the transformer, the loader and the stores.
//!
//! - [`FieldValue`] - one typed, validated column value
//! - [`PreparedRecord`] - a row ready for insertion
//! - [`RowOutcome`] - classification of a transformed row
//! - [`SkipReason`] - why a row was skipped

use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Canonical timestamp text form.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Canonical date text form.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// =============================================================================
// Field Values
// =============================================================================

/// A typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Let the store fill the column (SQL `DEFAULT`).
    Default,
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Uuid(Uuid),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
    Json(Value),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn is_default(&self) -> bool {
        matches!(self, FieldValue::Default)
    }

    /// Canonical text, or `None` for `Null`/`Default`.
    pub fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::Default | FieldValue::Null => None,
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Integer(i) => Some(i.to_string()),
            FieldValue::Float(f) => Some(f.to_string()),
            FieldValue::Boolean(b) => Some(b.to_string()),
            FieldValue::Uuid(u) => Some(u.to_string()),
            FieldValue::Timestamp(ts) => Some(ts.format(TIMESTAMP_FORMAT).to_string()),
            FieldValue::Date(d) => Some(d.format(DATE_FORMAT).to_string()),
            FieldValue::Json(v) => Some(v.to_string()),
        }
    }

    /// JSON rendering used by dry runs and `--json` output.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Default | FieldValue::Null => Value::Null,
            FieldValue::Integer(i) => Value::from(*i),
            FieldValue::Float(f) => Value::from(*f),
            FieldValue::Boolean(b) => Value::Bool(*b),
            FieldValue::Json(v) => v.clone(),
            other => other.as_text().map(Value::String).unwrap_or(Value::Null),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Default => write!(f, "DEFAULT"),
            FieldValue::Null => write!(f, "NULL"),
            other => write!(f, "{}", other.as_text().unwrap_or_default()),
        }
    }
}

// =============================================================================
// Prepared Records
// =============================================================================

/// A row that passed transformation, aligned with its table's columns.
///
/// The column list is shared by every record of one import run.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRecord {
    pub columns: Arc<[String]>,
    pub values: Vec<FieldValue>,
    /// Human label used in row error messages.
    pub label: String,
}

impl PreparedRecord {
    pub fn new(columns: Arc<[String]>, values: Vec<FieldValue>, label: impl Into<String>) -> Self {
        Self { columns, values, label: label.into() }
    }

    /// Value of a column by name.
    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    /// Iterate `(column, value)` pairs in table order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }

    /// JSON object form, column order preserved.
    pub fn to_json(&self) -> Value {
        let map = self
            .iter()
            .map(|(c, v)| (c.to_string(), v.to_json()))
            .collect::<serde_json::Map<_, _>>();
        Value::Object(map)
    }
}

// =============================================================================
// Row Outcomes
// =============================================================================

/// Why a row was skipped. Skips are expected and never logged per row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// A required field was empty or unparseable.
    MissingRequired { column: String },
    /// A required reference was not a well-formed key.
    InvalidReference { column: String },
    /// A required reference is well-formed but unknown upstream.
    UnknownReference { column: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingRequired { column } => write!(f, "missing required '{}'", column),
            SkipReason::InvalidReference { column } => write!(f, "invalid reference in '{}'", column),
            SkipReason::UnknownReference { column } => write!(f, "unknown reference in '{}'", column),
        }
    }
}

/// Classification of one transformed row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Accepted(PreparedRecord),
    Skipped(SkipReason),
    Malformed(String),
}

impl RowOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, RowOutcome::Accepted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn columns(names: &[&str]) -> Arc<[String]> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_timestamp_text_is_canonical() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 5)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        assert_eq!(FieldValue::Timestamp(ts).as_text().unwrap(), "2024-01-05 10:30:00");
        let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(FieldValue::Date(d).to_string(), "2024-02-29");
    }

    #[test]
    fn test_null_and_default_have_no_text() {
        assert_eq!(FieldValue::Null.as_text(), None);
        assert_eq!(FieldValue::Default.as_text(), None);
        assert_eq!(FieldValue::Default.to_string(), "DEFAULT");
    }

    #[test]
    fn test_record_lookup_by_column() {
        let record = PreparedRecord::new(
            columns(&["uuid", "name"]),
            vec![FieldValue::Default, FieldValue::Text("admin".into())],
            "admin",
        );
        assert_eq!(record.get("name"), Some(&FieldValue::Text("admin".into())));
        assert!(record.get("uuid").unwrap().is_default());
        assert_eq!(record.get("missing"), None);
    }

    #[test]
    fn test_record_json_keeps_column_order() {
        let record = PreparedRecord::new(
            columns(&["z", "a"]),
            vec![FieldValue::Integer(1), FieldValue::Boolean(true)],
            "",
        );
        assert_eq!(record.to_json().to_string(), r#"{"z":1,"a":true}"#);
    }

    #[test]
    fn test_skip_reason_display() {
        let reason = SkipReason::UnknownReference { column: "user_uuid".into() };
        assert_eq!(reason.to_string(), "unknown reference in 'user_uuid'");
    }
}
