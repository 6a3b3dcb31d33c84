//! Row transformer: raw CSV row -> accepted, skipped or malformed.
//!
//! Stateless apart from the borrowed mapping and reference sets. The clock
//! used for auto-stamped columns is fixed when the transformer is built, so
//! every row of a run gets the same fallback time.

use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use serde_json::Value;

use super::payload::decode_payload;
use super::values::{parse_boolean, parse_date, parse_float, parse_integer, parse_timestamp, parse_uuid};
use crate::mapping::{EntityMapping, FieldKind, FieldSpec, TimestampFallback};
use crate::models::{FieldValue, PreparedRecord, RowOutcome, SkipReason};
use crate::parser::RawRow;
use crate::references::ReferenceSets;
use crate::validation::validate_record;

/// Applies one entity mapping to raw rows.
pub struct RowTransformer<'a> {
    mapping: &'a EntityMapping,
    references: &'a ReferenceSets,
    columns: Arc<[String]>,
    now: NaiveDateTime,
}

impl<'a> RowTransformer<'a> {
    pub fn new(mapping: &'a EntityMapping, references: &'a ReferenceSets) -> Self {
        Self::with_clock(mapping, references, Utc::now().naive_utc())
    }

    /// Build with a fixed "now" for auto-stamped columns.
    pub fn with_clock(
        mapping: &'a EntityMapping,
        references: &'a ReferenceSets,
        now: NaiveDateTime,
    ) -> Self {
        Self { mapping, references, columns: mapping.columns(), now }
    }

    pub fn columns(&self) -> &Arc<[String]> {
        &self.columns
    }

    /// Classify and convert one row.
    pub fn transform(&self, row: &RawRow) -> RowOutcome {
        let mut values = Vec::with_capacity(self.mapping.fields.len());

        for field in &self.mapping.fields {
            let raw = if field.reads_input() {
                row.get(field.source_column()).unwrap_or("")
            } else {
                ""
            };
            match self.field_value(field, raw) {
                Ok(value) => values.push(value),
                Err(reason) => return RowOutcome::Skipped(reason),
            }
        }

        let record = PreparedRecord::new(Arc::clone(&self.columns), values, self.label(row));

        match validate_record(&record, self.mapping, self.references) {
            Ok(()) => RowOutcome::Accepted(record),
            Err(errors) => RowOutcome::Malformed(format!("line {}: {}", row.line, errors.join("; "))),
        }
    }

    fn label(&self, row: &RawRow) -> String {
        self.mapping
            .label_column
            .as_deref()
            .and_then(|c| row.get(c))
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("line {}", row.line))
    }

    fn field_value(&self, field: &FieldSpec, raw: &str) -> Result<FieldValue, SkipReason> {
        let trimmed = raw.trim();
        let column = || field.column.clone();

        let value = match &field.kind {
            FieldKind::Identifier => parse_uuid(trimmed)
                .map(FieldValue::Uuid)
                .unwrap_or(FieldValue::Default),

            FieldKind::Uuid => parse_uuid(trimmed).map(FieldValue::Uuid).unwrap_or(FieldValue::Null),

            FieldKind::Reference { reference } => {
                if trimmed.is_empty() {
                    FieldValue::Null
                } else {
                    match parse_uuid(trimmed) {
                        None if field.required => {
                            return Err(SkipReason::InvalidReference { column: column() })
                        }
                        None => FieldValue::Null,
                        Some(u) if self.references.is_valid(reference, &u.to_string()) => {
                            FieldValue::Uuid(u)
                        }
                        Some(_) if field.required => {
                            return Err(SkipReason::UnknownReference { column: column() })
                        }
                        Some(_) => FieldValue::Null,
                    }
                }
            }

            FieldKind::NaturalKey { reference } => {
                if trimmed.is_empty() {
                    FieldValue::Null
                } else {
                    match self.references.resolve(reference, trimmed) {
                        Some(resolved) => parse_uuid(resolved)
                            .map(FieldValue::Uuid)
                            .unwrap_or_else(|| FieldValue::Text(resolved.to_string())),
                        None if field.required => {
                            return Err(SkipReason::UnknownReference { column: column() })
                        }
                        None => FieldValue::Null,
                    }
                }
            }

            FieldKind::Text { default } => {
                if trimmed.is_empty() {
                    default.clone().map(FieldValue::Text).unwrap_or(FieldValue::Null)
                } else {
                    FieldValue::Text(raw.to_string())
                }
            }

            FieldKind::Integer { default } => parse_integer(trimmed)
                .or(*default)
                .map(FieldValue::Integer)
                .unwrap_or(FieldValue::Null),

            FieldKind::Float { default } => parse_float(trimmed)
                .or(*default)
                .map(FieldValue::Float)
                .unwrap_or(FieldValue::Null),

            FieldKind::Boolean { when_empty } => {
                if trimmed.is_empty() {
                    FieldValue::Boolean(*when_empty)
                } else {
                    FieldValue::Boolean(parse_boolean(trimmed))
                }
            }

            FieldKind::Timestamp { fallback } => match (parse_timestamp(trimmed), fallback) {
                (Some(ts), _) => FieldValue::Timestamp(ts),
                (None, TimestampFallback::Now) => FieldValue::Timestamp(self.now),
                (None, TimestampFallback::Null) => FieldValue::Null,
            },

            FieldKind::Date => parse_date(trimmed).map(FieldValue::Date).unwrap_or(FieldValue::Null),

            FieldKind::Json => decode_payload(raw).map(FieldValue::Json).unwrap_or(FieldValue::Null),

            FieldKind::Constant { value } => constant_value(value),
        };

        if field.required && (value.is_null() || value.is_default()) {
            return Err(match field.kind {
                FieldKind::Reference { .. } | FieldKind::NaturalKey { .. } if !trimmed.is_empty() => {
                    SkipReason::InvalidReference { column: column() }
                }
                _ => SkipReason::MissingRequired { column: column() },
            });
        }

        Ok(value)
    }
}

fn constant_value(value: &Value) -> FieldValue {
    match value {
        Value::Null => FieldValue::Null,
        Value::Bool(b) => FieldValue::Boolean(*b),
        Value::String(s) => FieldValue::Text(s.clone()),
        Value::Number(n) => match n.as_i64() {
            Some(i) => FieldValue::Integer(i),
            None => n.as_f64().map(FieldValue::Float).unwrap_or(FieldValue::Null),
        },
        other => FieldValue::Json(other.clone()),
    }
}

/// Transform a single row with a one-off transformer.
pub fn transform_row(row: &RawRow, mapping: &EntityMapping, references: &ReferenceSets) -> RowOutcome {
    RowTransformer::new(mapping, references).transform(row)
}
