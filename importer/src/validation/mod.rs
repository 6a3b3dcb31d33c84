//! Invariant checks for prepared records.
//!
//! The transformer already produces well-formed values; this is the last
//! gate before a record reaches the loader, and it also guards records
//! produced by user-supplied mappings. A record that fails here is counted
//! as malformed.
//!
//! Checked:
//! - values line up with the mapping's columns
//! - required fields are non-null
//! - reference fields are null or present in their reference set
//! - floats are finite
//! - text and JSON contain no NUL characters (rejected by PostgreSQL)

use serde_json::Value;

use crate::mapping::{EntityMapping, FieldKind};
use crate::models::{FieldValue, PreparedRecord};
use crate::references::ReferenceSets;

/// Validate a prepared record against its mapping.
///
/// # Returns
/// * `Ok(())` if every invariant holds
/// * `Err(Vec<String>)` with one message per violation
pub fn validate_record(
    record: &PreparedRecord,
    mapping: &EntityMapping,
    references: &ReferenceSets,
) -> Result<(), Vec<String>> {
    if record.values.len() != mapping.fields.len() {
        return Err(vec![format!(
            "{} values for {} columns",
            record.values.len(),
            mapping.fields.len()
        )]);
    }

    let mut errors = Vec::new();

    for (field, value) in mapping.fields.iter().zip(&record.values) {
        let column = &field.column;

        if field.required && (value.is_null() || value.is_default()) {
            errors.push(format!("'{}' is required", column));
        }

        if let FieldKind::Reference { reference } = &field.kind {
            if let FieldValue::Uuid(u) = value {
                if !references.is_valid(reference, &u.to_string()) {
                    errors.push(format!("'{}' references unknown {}", column, u));
                }
            } else if !value.is_null() {
                errors.push(format!("'{}' must be a UUID or null", column));
            }
        }

        match value {
            FieldValue::Float(f) if !f.is_finite() => {
                errors.push(format!("'{}' is not finite", column));
            }
            FieldValue::Text(s) if s.contains('\0') => {
                errors.push(format!("'{}' contains a NUL character", column));
            }
            FieldValue::Json(v) if json_has_nul(v) => {
                errors.push(format!("'{}' contains a NUL character", column));
            }
            _ => {}
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Quick yes/no form of [`validate_record`].
pub fn is_valid_record(
    record: &PreparedRecord,
    mapping: &EntityMapping,
    references: &ReferenceSets,
) -> bool {
    validate_record(record, mapping, references).is_ok()
}

fn json_has_nul(value: &Value) -> bool {
    match value {
        Value::String(s) => s.contains('\0'),
        Value::Array(items) => items.iter().any(json_has_nul),
        Value::Object(map) => map.iter().any(|(k, v)| k.contains('\0') || json_has_nul(v)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{FieldSpec, ReferenceSpec};
    use crate::references::ReferenceSet;
    use serde_json::json;
    use uuid::Uuid;

    const U1: &str = "6f1c1a8e-4b0a-4c4e-9a53-2f1f3c9d8e01";

    fn mapping() -> EntityMapping {
        EntityMapping::new("events", "platform_events")
            .with_reference("users", ReferenceSpec::uuid("users"))
            .field(FieldSpec::reference("user_uuid", "users").required())
            .field(FieldSpec::text("reason"))
            .field(FieldSpec::float("amount"))
            .field(FieldSpec::json("data"))
    }

    fn record(values: Vec<FieldValue>) -> PreparedRecord {
        PreparedRecord::new(mapping().columns(), values, "x")
    }

    fn refs() -> ReferenceSets {
        ReferenceSets::new().with_set("users", ReferenceSet::from_keys([U1]))
    }

    fn user() -> FieldValue {
        FieldValue::Uuid(Uuid::parse_str(U1).unwrap())
    }

    #[test]
    fn test_valid_record() {
        let r = record(vec![user(), FieldValue::Null, FieldValue::Float(1.0), FieldValue::Null]);
        assert!(is_valid_record(&r, &mapping(), &refs()));
    }

    #[test]
    fn test_required_null_rejected() {
        let r = record(vec![FieldValue::Null, FieldValue::Null, FieldValue::Null, FieldValue::Null]);
        let errors = validate_record(&r, &mapping(), &refs()).unwrap_err();
        assert!(errors[0].contains("user_uuid"));
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let other = FieldValue::Uuid(Uuid::new_v4());
        let r = record(vec![other, FieldValue::Null, FieldValue::Null, FieldValue::Null]);
        assert!(!is_valid_record(&r, &mapping(), &refs()));
    }

    #[test]
    fn test_nul_characters_rejected() {
        let r = record(vec![
            user(),
            FieldValue::Text("bad\0text".into()),
            FieldValue::Float(f64::NAN),
            FieldValue::Json(json!({"k": ["a\0"]})),
        ]);
        let errors = validate_record(&r, &mapping(), &refs()).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_misaligned_values_rejected() {
        let r = PreparedRecord::new(mapping().columns(), vec![user()], "x");
        assert!(!is_valid_record(&r, &mapping(), &refs()));
    }
}
