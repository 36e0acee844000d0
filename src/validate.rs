//! Batch quality checks run before anything is written
//!
//! A failing batch is rejected whole for the current run; there is no
//! row-level skipping.

use std::collections::HashSet;
use thiserror::Error;

use crate::normalize::{Row, Value};
use crate::schema::{ColumnType, RecordType};

/// ---------------------------------------------------------------------------
/// Error Types
/// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ValidationError {
  #[error("primary key column '{column}' contains {count} null value(s)")]
  NullPrimaryKey { column: &'static str, count: usize },

  #[error("primary key column '{column}' has duplicate value '{value}'")]
  DuplicatePrimaryKey { column: &'static str, value: String },

  #[error("batch is missing schema columns: {columns:?}")]
  MissingColumns { columns: Vec<String> },

  #[error("column '{column}' holds a {found} value, expected {expected}")]
  TypeMismatch {
    column: &'static str,
    expected: &'static str,
    found: &'static str,
  },

  #[error("strain value {value} outside [0, 21]")]
  StrainOutOfRange { value: f64 },

  #[error("recovery_score value {value} outside [0, 100]")]
  RecoveryScoreOutOfRange { value: f64 },
}

/// ---------------------------------------------------------------------------
/// Validation
/// ---------------------------------------------------------------------------

/// Run every check against a normalized batch, in order, stopping at the
/// first violation.
pub fn validate(batch: &[Row], record_type: RecordType) -> Result<(), ValidationError> {
  assert_no_null_primary_key(batch, record_type)?;
  assert_unique_primary_key(batch, record_type)?;
  assert_columns_exist(batch, record_type)?;
  assert_column_types(batch, record_type)?;
  assert_strain_range(batch)?;
  assert_recovery_score_range(batch)?;
  Ok(())
}

fn assert_no_null_primary_key(
  batch: &[Row],
  record_type: RecordType,
) -> Result<(), ValidationError> {
  let pk = record_type.primary_key();
  let count = batch
    .iter()
    .filter(|row| row.get(pk).map(Value::is_null).unwrap_or(true))
    .count();
  if count > 0 {
    return Err(ValidationError::NullPrimaryKey { column: pk, count });
  }
  Ok(())
}

fn assert_unique_primary_key(
  batch: &[Row],
  record_type: RecordType,
) -> Result<(), ValidationError> {
  let pk = record_type.primary_key();
  let mut seen = HashSet::new();
  for row in batch {
    if let Some(value) = row.get(pk) {
      let key = key_of(value);
      if !seen.insert(key.clone()) {
        return Err(ValidationError::DuplicatePrimaryKey { column: pk, value: key });
      }
    }
  }
  Ok(())
}

fn assert_columns_exist(batch: &[Row], record_type: RecordType) -> Result<(), ValidationError> {
  for row in batch {
    let missing: Vec<String> = record_type
      .columns()
      .iter()
      .filter(|(name, _)| !row.contains_key(*name))
      .map(|(name, _)| name.to_string())
      .collect();
    if !missing.is_empty() {
      return Err(ValidationError::MissingColumns { columns: missing });
    }
  }
  Ok(())
}

fn assert_column_types(batch: &[Row], record_type: RecordType) -> Result<(), ValidationError> {
  for row in batch {
    for &(column, column_type) in record_type.columns() {
      if let Some(value) = row.get(column) {
        if !matches_type(value, column_type) {
          return Err(ValidationError::TypeMismatch {
            column,
            expected: column_type.name(),
            found: value.type_name(),
          });
        }
      }
    }
  }
  Ok(())
}

fn assert_strain_range(batch: &[Row]) -> Result<(), ValidationError> {
  for row in batch {
    if let Some(value) = row.get("strain").and_then(as_number) {
      if !(0.0..=21.0).contains(&value) {
        return Err(ValidationError::StrainOutOfRange { value });
      }
    }
  }
  Ok(())
}

fn assert_recovery_score_range(batch: &[Row]) -> Result<(), ValidationError> {
  for row in batch {
    if let Some(value) = row.get("recovery_score").and_then(as_number) {
      if !(0.0..=100.0).contains(&value) {
        return Err(ValidationError::RecoveryScoreOutOfRange { value });
      }
    }
  }
  Ok(())
}

/// ---------------------------------------------------------------------------
/// Helpers
/// ---------------------------------------------------------------------------

/// Null passes every category; whole-valued JSON numbers are accepted in
/// float columns.
fn matches_type(value: &Value, column_type: ColumnType) -> bool {
  matches!(
    (value, column_type),
    (Value::Null, _)
      | (Value::Datetime(_), ColumnType::Datetime)
      | (Value::Integer(_), ColumnType::Integer)
      | (Value::Integer(_), ColumnType::Float)
      | (Value::Float(_), ColumnType::Float)
      | (Value::Boolean(_), ColumnType::Boolean)
      | (Value::Text(_), ColumnType::Text)
  )
}

fn key_of(value: &Value) -> String {
  match value {
    Value::Integer(i) => i.to_string(),
    Value::Text(s) => s.clone(),
    other => format!("{:?}", other),
  }
}

fn as_number(value: &Value) -> Option<f64> {
  match value {
    Value::Integer(i) => Some(*i as f64),
    Value::Float(f) => Some(*f),
    _ => None,
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
