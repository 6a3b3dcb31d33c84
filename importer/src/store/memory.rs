//! In-memory store.
//!
//! Tables are schemaless lists of rows. The primary key column is `uuid`
//! when a row has one, otherwise `id`; `DEFAULT` keys are generated on
//! insert and duplicates are rejected. Extra not-null columns can be
//! declared per table. A whole `bulk_insert` call is checked before any row
//! is stored.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use super::{check_layout, BulkStore};
use crate::error::{StoreError, StoreResult};
use crate::models::{FieldValue, PreparedRecord};

type StoredRow = BTreeMap<String, FieldValue>;

#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<String, Vec<StoredRow>>,
    not_null: HashMap<String, HashSet<String>>,
    unavailable: HashSet<String>,
    next_id: HashMap<String, i64>,
}

/// Store keeping every table in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every access to `table` fail, as if it did not exist.
    pub fn without_table(self, table: &str) -> Self {
        self.lock().unavailable.insert(table.to_string());
        self
    }

    /// Reject inserts where `column` is null.
    pub fn with_not_null(self, table: &str, column: &str) -> Self {
        self.lock()
            .not_null
            .entry(table.to_string())
            .or_default()
            .insert(column.to_string());
        self
    }

    /// Add rows directly, bypassing all checks.
    pub fn seed(&self, table: &str, columns: &[&str], rows: Vec<Vec<FieldValue>>) {
        let mut tables = self.lock();
        let stored = tables.rows.entry(table.to_string()).or_default();
        for values in rows {
            stored.push(columns.iter().map(|c| c.to_string()).zip(values).collect());
        }
    }

    /// Number of rows in `table`.
    pub fn count(&self, table: &str) -> usize {
        self.lock().rows.get(table).map_or(0, Vec::len)
    }

    /// Every value of `column` in `table`, in insertion order.
    pub fn column(&self, table: &str, column: &str) -> Vec<FieldValue> {
        self.lock()
            .rows
            .get(table)
            .map(|rows| {
                rows.iter()
                    .map(|r| r.get(column).cloned().unwrap_or(FieldValue::Null))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        // A panic while holding the lock leaves the maps consistent
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn primary_key(row: &StoredRow) -> Option<&'static str> {
    if row.contains_key("uuid") {
        Some("uuid")
    } else if row.contains_key("id") {
        Some("id")
    } else {
        None
    }
}

fn key_text(value: &FieldValue) -> Option<String> {
    value.as_text().map(|s| s.to_lowercase())
}

#[async_trait]
impl BulkStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn fetch_keys(
        &self,
        table: &str,
        key_column: &str,
        value_column: Option<&str>,
    ) -> StoreResult<Vec<(String, Option<String>)>> {
        let tables = self.lock();
        if tables.unavailable.contains(table) {
            return Err(StoreError::UnknownTable(table.to_string()));
        }

        let mut seen = HashSet::new();
        let mut pairs = Vec::new();
        for row in tables.rows.get(table).into_iter().flatten() {
            let Some(key) = row.get(key_column).and_then(FieldValue::as_text) else {
                continue;
            };
            let value = value_column.and_then(|c| row.get(c)).and_then(FieldValue::as_text);
            if seen.insert((key.clone(), value.clone())) {
                pairs.push((key, value));
            }
        }
        Ok(pairs)
    }

    async fn bulk_insert(&self, table: &str, records: &[PreparedRecord]) -> StoreResult<u64> {
        check_layout(table, records)?;
        let mut tables = self.lock();
        if tables.unavailable.contains(table) {
            return Err(StoreError::UnknownTable(table.to_string()));
        }

        let violation = |message: String| StoreError::Constraint {
            table: table.to_string(),
            message,
        };

        let not_null = tables.not_null.get(table).cloned().unwrap_or_default();
        let existing = tables.rows.get(table).map(Vec::as_slice).unwrap_or(&[]);
        let mut keys: HashSet<String> = existing
            .iter()
            .filter_map(|row| primary_key(row).and_then(|pk| row.get(pk)).and_then(key_text))
            .collect();
        let mut next_id = tables.next_id.get(table).copied().unwrap_or(existing.len() as i64 + 1);

        let mut staged = Vec::with_capacity(records.len());
        for record in records {
            let mut row: StoredRow = record
                .iter()
                .map(|(c, v)| (c.to_string(), v.clone()))
                .collect();

            for column in &not_null {
                if row.get(column).map_or(true, |v| v.is_null()) {
                    return Err(violation(format!(
                        "null value in column \"{}\" violates not-null constraint",
                        column
                    )));
                }
            }

            if let Some(pk) = primary_key(&row) {
                if row.get(pk).is_some_and(FieldValue::is_default) {
                    let generated = if pk == "uuid" {
                        FieldValue::Uuid(Uuid::new_v4())
                    } else {
                        next_id += 1;
                        FieldValue::Integer(next_id - 1)
                    };
                    row.insert(pk.to_string(), generated);
                }
                if let Some(key) = row.get(pk).and_then(key_text) {
                    if !keys.insert(key.clone()) {
                        return Err(violation(format!(
                            "duplicate key value violates unique constraint: {}={}",
                            pk, key
                        )));
                    }
                }
            }

            // Remaining DEFAULT columns have no server-side default here
            for value in row.values_mut() {
                if value.is_default() {
                    *value = FieldValue::Null;
                }
            }
            staged.push(row);
        }

        let inserted = staged.len() as u64;
        tables.next_id.insert(table.to_string(), next_id);
        tables.rows.entry(table.to_string()).or_default().extend(staged);
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const U1: &str = "6f1c1a8e-4b0a-4c4e-9a53-2f1f3c9d8e01";

    fn record(values: Vec<FieldValue>, label: &str) -> PreparedRecord {
        let columns: Arc<[String]> = ["uuid", "name"].iter().map(|s| s.to_string()).collect();
        PreparedRecord::new(columns, values, label)
    }

    #[tokio::test]
    async fn test_default_key_generated() {
        let store = MemoryStore::new();
        let n = store
            .bulk_insert(
                "roles",
                &[
                    record(vec![FieldValue::Default, FieldValue::Text("a".into())], "a"),
                    record(vec![FieldValue::Default, FieldValue::Text("b".into())], "b"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(n, 2);
        let keys = store.column("roles", "uuid");
        assert!(keys.iter().all(|k| matches!(k, FieldValue::Uuid(_))));
        assert_ne!(keys[0], keys[1]);
    }

    #[tokio::test]
    async fn test_duplicate_key_fails_whole_call() {
        let store = MemoryStore::new();
        let u = FieldValue::Uuid(Uuid::parse_str(U1).unwrap());
        let result = store
            .bulk_insert(
                "roles",
                &[
                    record(vec![u.clone(), FieldValue::Text("a".into())], "a"),
                    record(vec![u, FieldValue::Text("b".into())], "b"),
                ],
            )
            .await;
        assert!(matches!(result, Err(StoreError::Constraint { .. })));
        assert_eq!(store.count("roles"), 0);
    }

    #[tokio::test]
    async fn test_not_null_enforced() {
        let store = MemoryStore::new().with_not_null("roles", "name");
        let result = store
            .bulk_insert("roles", &[record(vec![FieldValue::Default, FieldValue::Null], "x")])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_fetch_keys_distinct_and_paired() {
        let store = MemoryStore::new();
        store.seed(
            "discount_codes",
            &["uuid", "code"],
            vec![
                vec![FieldValue::Text(U1.into()), FieldValue::Text("A".into())],
                vec![FieldValue::Text(U1.into()), FieldValue::Text("A".into())],
                vec![FieldValue::Null, FieldValue::Text("B".into())],
            ],
        );
        let pairs = store.fetch_keys("discount_codes", "code", Some("uuid")).await.unwrap();
        assert_eq!(pairs.len(), 2);
        let keys = store.fetch_keys("discount_codes", "uuid", None).await.unwrap();
        assert_eq!(keys, vec![(U1.to_string(), None)]);
        assert!(store.fetch_keys("missing", "uuid", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_table_errors() {
        let store = MemoryStore::new().without_table("users");
        assert!(store.fetch_keys("users", "uuid", None).await.is_err());
    }
}
