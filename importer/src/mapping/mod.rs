//! Declarative entity mappings.
//!
//! An [`EntityMapping`] describes how one CSV file becomes rows of one
//! table: which columns are read, how each is coerced, and which upstream
//! tables provide the foreign keys. Mappings are plain data; they can be
//! printed as JSON, edited, and loaded back.
//!
//! ```json
//! {
//!   "name": "roles",
//!   "table": "roles",
//!   "label_column": "name",
//!   "fields": [
//!     { "column": "uuid", "type": "identifier" },
//!     { "column": "name", "type": "text", "required": true },
//!     { "column": "created_at", "type": "timestamp", "fallback": "now" }
//!   ]
//! }
//! ```

pub mod catalog;
pub mod graph;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MappingError, MappingResult};
use crate::parser::Header;

pub use catalog::{builtin, builtin_names, find_builtin};
pub use graph::{DependencyGraph, import_order};

// =============================================================================
// Field Specs
// =============================================================================

/// How a raw value is turned into a typed column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    /// Own primary key: a valid UUID passes, anything else lets the store generate one.
    Identifier,

    /// UUID value with no referential check.
    Uuid,

    /// Foreign key checked against a declared reference.
    Reference { reference: String },

    /// Natural key (code, email) resolved to the referenced row's UUID.
    NaturalKey { reference: String },

    Text {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },

    Integer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<i64>,
    },

    Float {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<f64>,
    },

    Boolean {
        /// Value used when the cell is empty.
        #[serde(default)]
        when_empty: bool,
    },

    Timestamp {
        #[serde(default)]
        fallback: TimestampFallback,
    },

    Date,

    /// Structured payload (legacy serialized or JSON), stored as JSON.
    Json,

    /// Same value for every row; nothing is read from the CSV.
    Constant { value: Value },
}

/// What an empty or unparseable timestamp becomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampFallback {
    #[default]
    Null,
    /// Import time, for auto-stamped columns.
    Now,
}

/// Mapping rule for a single target column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Target column
    pub column: String,

    /// CSV column to read (defaults to `column`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(flatten)]
    pub kind: FieldKind,

    /// Rows with an empty/invalid value here are skipped
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
}

impl FieldSpec {
    pub fn new(column: &str, kind: FieldKind) -> Self {
        Self { column: column.to_string(), source: None, kind, required: false }
    }

    pub fn identifier(column: &str) -> Self {
        Self::new(column, FieldKind::Identifier)
    }

    pub fn uuid(column: &str) -> Self {
        Self::new(column, FieldKind::Uuid)
    }

    pub fn reference(column: &str, reference: &str) -> Self {
        Self::new(column, FieldKind::Reference { reference: reference.to_string() })
    }

    pub fn natural_key(column: &str, reference: &str) -> Self {
        Self::new(column, FieldKind::NaturalKey { reference: reference.to_string() })
    }

    pub fn text(column: &str) -> Self {
        Self::new(column, FieldKind::Text { default: None })
    }

    pub fn integer(column: &str) -> Self {
        Self::new(column, FieldKind::Integer { default: None })
    }

    pub fn float(column: &str) -> Self {
        Self::new(column, FieldKind::Float { default: None })
    }

    pub fn boolean(column: &str) -> Self {
        Self::new(column, FieldKind::Boolean { when_empty: false })
    }

    pub fn timestamp(column: &str) -> Self {
        Self::new(column, FieldKind::Timestamp { fallback: TimestampFallback::Null })
    }

    /// Timestamp that falls back to the import time.
    pub fn stamped(column: &str) -> Self {
        Self::new(column, FieldKind::Timestamp { fallback: TimestampFallback::Now })
    }

    pub fn date(column: &str) -> Self {
        Self::new(column, FieldKind::Date)
    }

    pub fn json(column: &str) -> Self {
        Self::new(column, FieldKind::Json)
    }

    pub fn constant(column: &str, value: Value) -> Self {
        Self::new(column, FieldKind::Constant { value })
    }

    /// Read from a differently named CSV column.
    pub fn from_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    /// Set the default used for empty or unparseable values.
    ///
    /// Applies to text, integer, float and boolean fields; ignored otherwise.
    pub fn with_default(mut self, default: Value) -> Self {
        self.kind = match self.kind {
            FieldKind::Text { .. } => FieldKind::Text {
                default: default.as_str().map(str::to_string),
            },
            FieldKind::Integer { .. } => FieldKind::Integer { default: default.as_i64() },
            FieldKind::Float { .. } => FieldKind::Float { default: default.as_f64() },
            FieldKind::Boolean { .. } => FieldKind::Boolean {
                when_empty: default.as_bool().unwrap_or(false),
            },
            other => other,
        };
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// CSV column this field reads.
    pub fn source_column(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.column)
    }

    /// Reference name, for reference and natural-key fields.
    pub fn reference_name(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Reference { reference } | FieldKind::NaturalKey { reference } => {
                Some(reference)
            }
            _ => None,
        }
    }

    /// Whether the CSV is consulted at all.
    pub fn reads_input(&self) -> bool {
        !matches!(self.kind, FieldKind::Constant { .. })
    }
}

// =============================================================================
// References
// =============================================================================

/// Shape of a reference key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// Canonical UUID, compared lowercase.
    #[default]
    Uuid,
    /// Free text natural key, compared trimmed and lowercase.
    Natural,
}

/// Where valid keys for a reference come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceSpec {
    /// Upstream table
    pub table: String,

    /// Column holding the key looked up
    #[serde(default = "default_key_column")]
    pub key_column: String,

    /// Column resolved for natural keys (the upstream UUID)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_column: Option<String>,

    #[serde(default)]
    pub kind: KeyKind,
}

fn default_key_column() -> String {
    "uuid".to_string()
}

impl ReferenceSpec {
    /// UUID primary-key reference into `table`.
    pub fn uuid(table: &str) -> Self {
        Self {
            table: table.to_string(),
            key_column: default_key_column(),
            value_column: None,
            kind: KeyKind::Uuid,
        }
    }

    /// Natural-key reference resolving `key_column` to `value_column`.
    pub fn natural(table: &str, key_column: &str, value_column: &str) -> Self {
        Self {
            table: table.to_string(),
            key_column: key_column.to_string(),
            value_column: Some(value_column.to_string()),
            kind: KeyKind::Natural,
        }
    }
}

// =============================================================================
// Entity Mapping
// =============================================================================

/// Complete mapping for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMapping {
    /// Entity name, also used for the default file `new_<name>.csv`
    pub name: String,

    /// Target table
    pub table: String,

    #[serde(default)]
    pub description: String,

    /// Column quoted in row error messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_column: Option<String>,

    /// Reference name -> upstream source
    #[serde(default)]
    pub references: BTreeMap<String, ReferenceSpec>,

    pub fields: Vec<FieldSpec>,
}

impl EntityMapping {
    pub fn new(name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            description: String::new(),
            label_column: None,
            references: BTreeMap::new(),
            fields: Vec::new(),
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn labelled_by(mut self, column: &str) -> Self {
        self.label_column = Some(column.to_string());
        self
    }

    pub fn with_reference(mut self, name: &str, spec: ReferenceSpec) -> Self {
        self.references.insert(name.to_string(), spec);
        self
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    /// Parse a mapping from JSON and validate it
    pub fn from_json(json: &str) -> MappingResult<Self> {
        let mapping: Self = serde_json::from_str(json)?;
        mapping.validate()?;
        Ok(mapping)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> MappingResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Default input file name.
    pub fn default_file(&self) -> String {
        format!("new_{}.csv", self.name)
    }

    /// Target columns in insert order, shared by every prepared record.
    pub fn columns(&self) -> Arc<[String]> {
        self.fields.iter().map(|f| f.column.clone()).collect()
    }

    /// Every CSV column the mapping may read
    pub fn source_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self
            .fields
            .iter()
            .filter(|f| f.reads_input())
            .map(|f| f.source_column().to_string())
            .collect();
        columns.sort();
        columns.dedup();
        columns
    }

    /// Source columns missing from a header
    pub fn missing_columns(&self, header: &Header) -> Vec<String> {
        self.source_columns()
            .into_iter()
            .filter(|c| !header.contains(c))
            .collect()
    }

    /// Tables this entity depends on, excluding itself
    pub fn upstream_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self
            .references
            .values()
            .filter(|r| r.table != self.table)
            .map(|r| r.table.clone())
            .collect();
        tables.sort();
        tables.dedup();
        tables
    }

    /// Check internal consistency.
    pub fn validate(&self) -> MappingResult<()> {
        let invalid = |message: String| MappingError::Invalid {
            entity: self.name.clone(),
            message,
        };

        if self.fields.is_empty() {
            return Err(invalid("no fields".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.column.as_str()) {
                return Err(invalid(format!("column '{}' mapped twice", field.column)));
            }
            if let Some(reference) = field.reference_name() {
                let spec = self.references.get(reference).ok_or_else(|| {
                    MappingError::UndeclaredReference {
                        entity: self.name.clone(),
                        reference: reference.to_string(),
                    }
                })?;
                let natural = matches!(field.kind, FieldKind::NaturalKey { .. });
                if natural != (spec.kind == KeyKind::Natural) {
                    return Err(invalid(format!(
                        "field '{}' and reference '{}' disagree on key kind",
                        field.column, reference
                    )));
                }
                if natural && spec.value_column.is_none() {
                    return Err(invalid(format!(
                        "natural key reference '{}' has no value column",
                        reference
                    )));
                }
            }
            if field.required && matches!(field.kind, FieldKind::Identifier) {
                return Err(invalid(format!(
                    "identifier '{}' cannot be required",
                    field.column
                )));
            }
        }

        if let Some(label) = &self.label_column {
            if !self.fields.iter().any(|f| f.source_column() == label) {
                return Err(invalid(format!("label column '{}' is not read", label)));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roles() -> EntityMapping {
        EntityMapping::new("roles", "roles")
            .labelled_by("name")
            .field(FieldSpec::identifier("uuid"))
            .field(FieldSpec::text("name").required())
            .field(FieldSpec::stamped("created_at"))
    }

    #[test]
    fn test_json_shape_is_flat() {
        let json = serde_json::to_value(roles()).unwrap();
        assert_eq!(json["fields"][0], json!({"column": "uuid", "type": "identifier"}));
        assert_eq!(
            json["fields"][1],
            json!({"column": "name", "type": "text", "required": true})
        );
        assert_eq!(json["fields"][2]["fallback"], "now");
    }

    #[test]
    fn test_json_roundtrip_preserves_mapping() {
        let mapping = roles();
        let parsed = EntityMapping::from_json(&mapping.to_json().unwrap()).unwrap();
        assert_eq!(parsed, mapping);
    }

    #[test]
    fn test_with_default_sets_kind_default() {
        let f = FieldSpec::float("amount").with_default(json!(0));
        assert_eq!(f.kind, FieldKind::Float { default: Some(0.0) });
        let t = FieldSpec::text("platform_name").with_default(json!("mt5"));
        assert_eq!(t.kind, FieldKind::Text { default: Some("mt5".into()) });
        let b = FieldSpec::boolean("status").with_default(json!(true));
        assert_eq!(b.kind, FieldKind::Boolean { when_empty: true });
    }

    #[test]
    fn test_source_column_override() {
        let f = FieldSpec::natural_key("discount_uuid", "discount_codes").from_source("discount_code");
        assert_eq!(f.source_column(), "discount_code");
        assert_eq!(f.reference_name(), Some("discount_codes"));
    }

    #[test]
    fn test_missing_columns_against_header() {
        let header = Header::new(vec!["uuid".into(), "name".into()]);
        assert_eq!(roles().missing_columns(&header), vec!["created_at".to_string()]);
    }

    #[test]
    fn test_undeclared_reference_rejected() {
        let mapping = EntityMapping::new("events", "platform_events")
            .field(FieldSpec::reference("user_uuid", "users"));
        assert!(matches!(
            mapping.validate(),
            Err(MappingError::UndeclaredReference { .. })
        ));
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let mapping = EntityMapping::new("x", "x")
            .field(FieldSpec::text("a"))
            .field(FieldSpec::integer("a"));
        assert!(mapping.validate().is_err());
    }

    #[test]
    fn test_upstream_tables_exclude_self() {
        let mapping = EntityMapping::new("users", "users")
            .with_reference("referrer", ReferenceSpec::uuid("users"))
            .with_reference("roles", ReferenceSpec::uuid("roles"))
            .field(FieldSpec::reference("ref_by", "referrer"))
            .field(FieldSpec::reference("role_id", "roles"));
        assert_eq!(mapping.upstream_tables(), vec!["roles".to_string()]);
    }

    #[test]
    fn test_default_file_name() {
        assert_eq!(roles().default_file(), "new_roles.csv");
    }
}
