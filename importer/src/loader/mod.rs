//! Chunked bulk loader.
//!
//! Buffers prepared records and writes them in batches. When a batch is
//! rejected, every record of that batch is retried on its own so a single
//! bad row costs one error instead of a whole chunk. Only the first few row
//! errors are logged; the rest are counted.

use std::slice;

use serde::Serialize;

use crate::logs::{log_error_indent, log_warning};
use crate::models::PreparedRecord;
use crate::store::BulkStore;

/// Default number of records per batch.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default number of row errors written to the log.
pub const DEFAULT_MAX_LOGGED_ERRORS: usize = 5;

/// One failed row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowError {
    pub label: String,
    pub message: String,
}

/// Counters of one load.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadStats {
    pub successful: u64,
    pub errors: u64,
    /// Batches attempted as a whole
    pub batches: u64,
    /// Batches that fell back to per-row inserts
    pub fallbacks: u64,
    /// First row errors, capped like the log
    pub error_samples: Vec<RowError>,
}

/// Writes records to one table through a [`BulkStore`].
pub struct ChunkedLoader<'a> {
    store: &'a dyn BulkStore,
    table: String,
    chunk_size: usize,
    max_logged_errors: usize,
    buffer: Vec<PreparedRecord>,
    stats: LoadStats,
}

impl<'a> ChunkedLoader<'a> {
    pub fn new(store: &'a dyn BulkStore, table: &str) -> Self {
        Self {
            store,
            table: table.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_logged_errors: DEFAULT_MAX_LOGGED_ERRORS,
            buffer: Vec::with_capacity(DEFAULT_CHUNK_SIZE),
            stats: LoadStats::default(),
        }
    }

    /// Records per batch; zero is treated as one.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.buffer = Vec::with_capacity(self.chunk_size.min(DEFAULT_CHUNK_SIZE * 10));
        self
    }

    pub fn with_max_logged_errors(mut self, max: usize) -> Self {
        self.max_logged_errors = max;
        self
    }

    pub fn stats(&self) -> &LoadStats {
        &self.stats
    }

    /// Records waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Queue a record, flushing when the chunk is full.
    pub async fn submit(&mut self, record: PreparedRecord) {
        self.buffer.push(record);
        if self.buffer.len() >= self.chunk_size {
            self.flush().await;
        }
    }

    /// Write whatever is buffered.
    pub async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.buffer);
        self.stats.batches += 1;

        match self.store.bulk_insert(&self.table, &batch).await {
            Ok(_) => {
                self.stats.successful += batch.len() as u64;
            }
            Err(e) => {
                self.stats.fallbacks += 1;
                log_warning(format!(
                    "Batch of {} rows rejected ({}), retrying row by row",
                    batch.len(),
                    e
                ));
                for record in &batch {
                    self.insert_one(record).await;
                }
            }
        }
    }

    async fn insert_one(&mut self, record: &PreparedRecord) {
        match self.store.bulk_insert(&self.table, slice::from_ref(record)).await {
            Ok(_) => self.stats.successful += 1,
            Err(e) => {
                self.stats.errors += 1;
                if self.stats.error_samples.len() < self.max_logged_errors {
                    log_error_indent(format!("Row error (label: {}): {}", record.label, e), 1);
                    self.stats.error_samples.push(RowError {
                        label: record.label.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Flush the tail and hand back the counters.
    pub async fn finish(mut self) -> LoadStats {
        self.flush().await;
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreResult;
    use crate::models::FieldValue;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counts calls and batch sizes on top of a memory store.
    struct CountingStore {
        inner: MemoryStore,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BulkStore for CountingStore {
        fn name(&self) -> &'static str {
            "counting"
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
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.bulk_insert(table, records).await
        }
    }

    fn records(n: usize, null_at: Option<usize>) -> Vec<PreparedRecord> {
        let columns: Arc<[String]> = ["uuid", "name"].iter().map(|s| s.to_string()).collect();
        (0..n)
            .map(|i| {
                let name = if Some(i) == null_at {
                    FieldValue::Null
                } else {
                    FieldValue::Text(format!("row-{}", i))
                };
                PreparedRecord::new(Arc::clone(&columns), vec![FieldValue::Default, name], format!("row-{}", i))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_one_bad_row_in_full_chunk() {
        let store = MemoryStore::new().with_not_null("roles", "name");
        let mut loader = ChunkedLoader::new(&store, "roles");
        for record in records(1000, Some(500)) {
            loader.submit(record).await;
        }
        let stats = loader.finish().await;

        assert_eq!(stats.successful, 999);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.fallbacks, 1);
        assert_eq!(stats.error_samples[0].label, "row-500");
        assert_eq!(store.count("roles"), 999);
    }

    #[tokio::test]
    async fn test_chunking_calls() {
        let store = CountingStore { inner: MemoryStore::new(), calls: AtomicUsize::new(0) };
        let mut loader = ChunkedLoader::new(&store, "roles").with_chunk_size(2);
        for record in records(5, None) {
            loader.submit(record).await;
        }
        assert_eq!(loader.pending(), 1);
        let stats = loader.finish().await;

        assert_eq!(stats.successful, 5);
        assert_eq!(stats.batches, 3);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.inner.count("roles"), 5);
    }

    #[tokio::test]
    async fn test_error_samples_capped() {
        let store = MemoryStore::new().without_table("roles");
        let mut loader = ChunkedLoader::new(&store, "roles").with_chunk_size(4);
        for record in records(8, None) {
            loader.submit(record).await;
        }
        let stats = loader.finish().await;

        assert_eq!(stats.successful, 0);
        assert_eq!(stats.errors, 8);
        assert_eq!(stats.error_samples.len(), DEFAULT_MAX_LOGGED_ERRORS);
    }

    #[tokio::test]
    async fn test_empty_finish_makes_no_calls() {
        let store = CountingStore { inner: MemoryStore::new(), calls: AtomicUsize::new(0) };
        let stats = ChunkedLoader::new(&store, "roles").finish().await;
        assert_eq!(stats, LoadStats::default());
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }
}
