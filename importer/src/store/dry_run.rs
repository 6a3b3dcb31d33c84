//! Dry-run wrapper: real reads, counted writes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{check_layout, BulkStore};
use crate::error::StoreResult;
use crate::logs::log_info_indent;
use crate::models::PreparedRecord;

/// Forwards reference reads to `inner` and accepts every insert without
/// writing it.
pub struct DryRunStore<S> {
    inner: S,
    counts: Mutex<BTreeMap<String, u64>>,
    sample_shown: AtomicBool,
}

impl<S: BulkStore> DryRunStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            counts: Mutex::new(BTreeMap::new()),
            sample_shown: AtomicBool::new(false),
        }
    }

    /// Rows that would have been written to `table`.
    pub fn would_insert(&self, table: &str) -> u64 {
        self.counts
            .lock()
            .map(|c| c.get(table).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: BulkStore> BulkStore for DryRunStore<S> {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    async fn fetch_keys(
        &self,
        table: &str,
        key_column: &str,
        value_column: Option<&str>,
    ) -> StoreResult<Vec<(String, Option<String>)>> {
        self.inner.fetch_keys(table, key_column, value_column).await
    }

    async fn bulk_insert(&self, table: &str, records: &[PreparedRecord]) -> StoreResult<u64> {
        check_layout(table, records)?;

        if let Some(first) = records.first() {
            if !self.sample_shown.swap(true, Ordering::Relaxed) {
                log_info_indent(format!("Sample record: {}", first.to_json()), 1);
            }
        }

        let n = records.len() as u64;
        if let Ok(mut counts) = self.counts.lock() {
            *counts.entry(table.to_string()).or_insert(0) += n;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldValue;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let columns: Arc<[String]> = ["uuid", "name"].iter().map(|s| s.to_string()).collect();
        let records = vec![
            PreparedRecord::new(Arc::clone(&columns), vec![FieldValue::Default, FieldValue::Text("a".into())], "a"),
            PreparedRecord::new(columns, vec![FieldValue::Default, FieldValue::Text("b".into())], "b"),
        ];

        let store = DryRunStore::new(MemoryStore::new());
        assert_eq!(store.bulk_insert("roles", &records).await.unwrap(), 2);
        assert_eq!(store.would_insert("roles"), 2);
        assert_eq!(store.into_inner().count("roles"), 0);
    }

    #[tokio::test]
    async fn test_dry_run_reads_through() {
        let inner = MemoryStore::new();
        inner.seed("users", &["uuid"], vec![vec![FieldValue::Text("k".into())]]);
        let store = DryRunStore::new(inner);
        let keys = store.fetch_keys("users", "uuid", None).await.unwrap();
        assert_eq!(keys, vec![("k".to_string(), None)]);
    }
}
