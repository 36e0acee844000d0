//! SQLite storage: pool setup, migrations and the batch upsert writer

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::QueryBuilder;
use thiserror::Error;

use crate::normalize::{Row, Value};
use crate::schema::RecordType;

pub type DbPool = SqlitePool;

/// ---------------------------------------------------------------------------
/// Error Types
/// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StorageError {
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("migration error: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),

  #[error("upsert of {rows} {record_type} row(s) failed: {source}")]
  Upsert {
    record_type: &'static str,
    rows: usize,
    source: sqlx::Error,
  },
}

/// ---------------------------------------------------------------------------
/// Pool Setup
/// ---------------------------------------------------------------------------

/// Initialize the database connection pool and run migrations.
pub async fn initialize_db(database_url: &str) -> Result<DbPool, StorageError> {
  let pool = SqlitePoolOptions::new()
    .max_connections(5)
    .connect(database_url)
    .await?;

  sqlx::migrate!("./migrations").run(&pool).await?;

  Ok(pool)
}

/// ---------------------------------------------------------------------------
/// Upsert Writer
/// ---------------------------------------------------------------------------

/// Insert a normalized batch into the record type's table, overwriting every
/// non-key column on primary-key conflict. The whole batch goes through one
/// statement inside one transaction: all rows land or none do.
pub async fn upsert_batch(
  pool: &DbPool,
  record_type: RecordType,
  batch: &[Row],
) -> Result<u64, StorageError> {
  if batch.is_empty() {
    return Ok(0);
  }

  let columns = record_type.columns();
  let pk = record_type.primary_key();

  let column_list = columns
    .iter()
    .map(|(name, _)| format!("\"{}\"", name))
    .collect::<Vec<_>>()
    .join(", ");

  let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(format!(
    "INSERT INTO {} ({}) ",
    record_type.table(),
    column_list
  ));

  builder.push_values(batch.iter(), |mut binds, row| {
    for &(column, _) in columns {
      match row.get(column) {
        Some(Value::Datetime(dt)) => {
          binds.push_bind(*dt);
        }
        Some(Value::Integer(i)) => {
          binds.push_bind(*i);
        }
        Some(Value::Float(f)) => {
          binds.push_bind(*f);
        }
        Some(Value::Boolean(b)) => {
          binds.push_bind(*b);
        }
        Some(Value::Text(s)) => {
          binds.push_bind(s.clone());
        }
        Some(Value::Null) | None => {
          binds.push_bind(Option::<String>::None);
        }
      }
    }
  });

  let updates = columns
    .iter()
    .filter(|(name, _)| *name != pk)
    .map(|(name, _)| format!("\"{0}\" = excluded.\"{0}\"", name))
    .collect::<Vec<_>>()
    .join(", ");
  builder.push(format!(" ON CONFLICT(\"{}\") DO UPDATE SET {}", pk, updates));

  let mut tx = pool.begin().await?;
  let result = builder
    .build()
    .execute(&mut *tx)
    .await
    .map_err(|e| StorageError::Upsert {
      record_type: record_type.name(),
      rows: batch.len(),
      source: e,
    })?;
  tx.commit().await?;

  Ok(result.rows_affected())
}

/// ---------------------------------------------------------------------------
/// Window Support
/// ---------------------------------------------------------------------------

/// Latest cycle ingestion timestamp, used to derive the incremental fetch
/// window. None on an empty warehouse.
pub async fn max_cycle_created_at(pool: &DbPool) -> Result<Option<DateTime<Utc>>, StorageError> {
  let max: Option<DateTime<Utc>> = sqlx::query_scalar("SELECT MAX(created_at) FROM fact_cycle")
    .fetch_one(pool)
    .await?;
  Ok(max)
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
