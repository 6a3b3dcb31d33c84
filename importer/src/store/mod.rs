//! Bulk store abstraction.
//!
//! The import driver only ever talks to a [`BulkStore`]: one call to read
//! reference keys, one call to insert a batch of prepared records. Each
//! `bulk_insert` call is all-or-nothing; the loader relies on that to retry
//! a failed batch row by row.
//!
//! Implementations:
//! - [`PgStore`] - PostgreSQL through a `sqlx` pool
//! - [`MemoryStore`] - in-process tables with primary key and not-null checks
//! - [`DryRunStore`] - reads from an inner store, counts writes, persists nothing

mod dry_run;
mod memory;
mod postgres;

pub use dry_run::DryRunStore;
pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::models::PreparedRecord;

/// Destination of an import run.
#[async_trait]
pub trait BulkStore: Send + Sync {
    /// Short backend name for log lines.
    fn name(&self) -> &'static str;

    /// Distinct non-null values of `key_column`, each paired with the
    /// matching `value_column` when one is given.
    async fn fetch_keys(
        &self,
        table: &str,
        key_column: &str,
        value_column: Option<&str>,
    ) -> StoreResult<Vec<(String, Option<String>)>>;

    /// Insert every record or none of them. Returns the number inserted.
    async fn bulk_insert(&self, table: &str, records: &[PreparedRecord]) -> StoreResult<u64>;
}

/// Check that every record of a batch shares the first record's columns.
pub(crate) fn check_layout(table: &str, records: &[PreparedRecord]) -> StoreResult<()> {
    let Some(first) = records.first() else {
        return Ok(());
    };
    let aligned = records.iter().all(|r| {
        r.values.len() == first.columns.len()
            && (std::sync::Arc::ptr_eq(&r.columns, &first.columns) || r.columns == first.columns)
    });
    if aligned {
        Ok(())
    } else {
        Err(StoreError::ColumnMismatch(table.to_string()))
    }
}
