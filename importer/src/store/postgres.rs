//! PostgreSQL store.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::query_builder::Separated;
use sqlx::{Postgres, QueryBuilder, Row};

use super::{check_layout, BulkStore};
use crate::error::{StoreError, StoreResult};
use crate::models::{FieldValue, PreparedRecord};

/// PostgreSQL caps bind parameters per statement at 65535.
const MAX_BINDS: usize = 65_535;

/// Bulk store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BulkStore for PgStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn fetch_keys(
        &self,
        table: &str,
        key_column: &str,
        value_column: Option<&str>,
    ) -> StoreResult<Vec<(String, Option<String>)>> {
        let key = quote_ident(key_column);
        let sql = match value_column {
            Some(value) => format!(
                "SELECT DISTINCT {key}::text AS key, {value}::text AS value FROM {table} WHERE {key} IS NOT NULL",
                key = key,
                value = quote_ident(value),
                table = quote_ident(table),
            ),
            None => format!(
                "SELECT DISTINCT {key}::text AS key, NULL::text AS value FROM {table} WHERE {key} IS NOT NULL",
                key = key,
                table = quote_ident(table),
            ),
        };

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut pairs = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get("key")?;
            let value: Option<String> = row.try_get("value")?;
            pairs.push((key, value));
        }
        Ok(pairs)
    }

    async fn bulk_insert(&self, table: &str, records: &[PreparedRecord]) -> StoreResult<u64> {
        let Some(first) = records.first() else {
            return Ok(0);
        };
        check_layout(table, records)?;

        let columns = &first.columns;
        let rows_per_statement = (MAX_BINDS / columns.len().max(1)).max(1);
        let prefix = format!(
            "INSERT INTO {} ({}) ",
            quote_ident(table),
            columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")
        );

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for slice in records.chunks(rows_per_statement) {
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(&prefix);
            qb.push_values(slice, |mut b, record| {
                for value in &record.values {
                    push_value(&mut b, value);
                }
            });
            let result = qb
                .build()
                .persistent(false)
                .execute(&mut *tx)
                .await
                .map_err(|e| classify(table, e))?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }
}

fn push_value(b: &mut Separated<'_, '_, Postgres, &'static str>, value: &FieldValue) {
    match value {
        FieldValue::Default => {
            b.push("DEFAULT");
        }
        FieldValue::Null => {
            b.push("NULL");
        }
        FieldValue::Text(s) => {
            b.push_bind(s.clone());
        }
        FieldValue::Integer(i) => {
            b.push_bind(*i);
        }
        FieldValue::Float(f) => {
            b.push_bind(*f);
        }
        FieldValue::Boolean(v) => {
            b.push_bind(*v);
        }
        FieldValue::Uuid(u) => {
            b.push_bind(*u);
        }
        FieldValue::Timestamp(ts) => {
            b.push_bind(*ts);
        }
        FieldValue::Date(d) => {
            b.push_bind(*d);
        }
        FieldValue::Json(v) => {
            b.push_bind(sqlx::types::Json(v.clone()));
        }
    }
}

/// Constraint violations become [`StoreError::Constraint`]; the rest stay
/// driver errors.
fn classify(table: &str, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.constraint().is_some() || is_integrity(db.code().as_deref()) {
            return StoreError::Constraint {
                table: table.to_string(),
                message: db.message().to_string(),
            };
        }
    }
    StoreError::Database(err)
}

/// SQLSTATE class 23 is integrity constraint violation.
fn is_integrity(code: Option<&str>) -> bool {
    code.is_some_and(|c| c.starts_with("23"))
}

/// Quote an identifier, keeping `schema.table` qualification.
fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}
