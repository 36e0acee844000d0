//! Schema-driven normalization of raw WHOOP records
//!
//! Turns flattened API JSON into rows matching the registry schema for a
//! record type: column-name resolution, primary-key renaming, timezone
//! offset conversion and per-category type coercion. Pure functions, no I/O.

use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use std::collections::HashMap;

use crate::schema::{ColumnType, RecordType};

/// A flattened API record: dotted paths to raw JSON values.
pub type RawRecord = HashMap<String, Json>;

/// A normalized row: exactly the schema's columns, typed values.
pub type Row = HashMap<String, Value>;

/// ---------------------------------------------------------------------------
/// Normalized Values
/// ---------------------------------------------------------------------------

/// A normalized cell. `Null` marks a field that was missing or could not be
/// parsed, distinct from zero or an empty string, and becomes SQL NULL.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Datetime(DateTime<Utc>),
  Integer(i64),
  Float(f64),
  Boolean(bool),
  Text(String),
  Null,
}

impl Value {
  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }

  pub fn type_name(&self) -> &'static str {
    match self {
      Value::Datetime(_) => "datetime",
      Value::Integer(_) => "integer",
      Value::Float(_) => "float",
      Value::Boolean(_) => "boolean",
      Value::Text(_) => "text",
      Value::Null => "null",
    }
  }
}

/// ---------------------------------------------------------------------------
/// Flattening
/// ---------------------------------------------------------------------------

/// Flatten a nested JSON record into dotted paths
/// (`score.stage_summary.total_in_bed_time_milli`). Arrays are kept whole
/// under their path; the API does not nest arrays in fields we consume.
pub fn flatten(record: &Json) -> RawRecord {
  let mut out = RawRecord::new();
  flatten_into(record, String::new(), &mut out);
  out
}

fn flatten_into(value: &Json, prefix: String, out: &mut RawRecord) {
  match value {
    Json::Object(map) => {
      for (key, child) in map {
        let path = if prefix.is_empty() {
          key.clone()
        } else {
          format!("{}.{}", prefix, key)
        };
        flatten_into(child, path, out);
      }
    }
    other => {
      out.insert(prefix, other.clone());
    }
  }
}

/// ---------------------------------------------------------------------------
/// Normalization
/// ---------------------------------------------------------------------------

/// Normalize a flattened raw batch into rows matching the registry schema.
/// Unknown raw fields are dropped; schema columns missing from the input are
/// carried as `Value::Null`. Never fails: unparsable values become `Null`.
pub fn normalize(raw_batch: &[RawRecord], record_type: RecordType) -> Vec<Row> {
  raw_batch
    .iter()
    .map(|raw| normalize_record(raw, record_type))
    .collect()
}

fn normalize_record(raw: &RawRecord, record_type: RecordType) -> Row {
  // Resolve every raw field to its target column name; first occurrence wins
  // so a top-level field is never shadowed by a nested one.
  let mut fields: HashMap<String, &Json> = HashMap::new();
  for (key, value) in raw {
    let name = if key == "id" {
      record_type.primary_key().to_string()
    } else {
      resolve_column_name(key, record_type)
    };
    fields.entry(name).or_insert(value);
  }

  let mut row = Row::new();
  for &(column, column_type) in record_type.columns() {
    let value = match fields.get(column) {
      Some(json) if column == "timezone_offset" => normalize_timezone_offset(json),
      Some(json) => coerce(json, column_type),
      None => Value::Null,
    };
    row.insert(column.to_string(), value);
  }
  row
}

/// Resolve a dotted raw field name to its column name: keep the last path
/// segment, except under `sleep_needed.` on sleep records, where sibling
/// counters share suffixes like `baseline_milli` and the prefix is kept.
fn resolve_column_name(raw: &str, record_type: RecordType) -> String {
  if record_type == RecordType::Sleep {
    if let Some(pos) = raw.find("sleep_needed.") {
      let suffix = &raw[pos + "sleep_needed.".len()..];
      return format!("sleep_needed_{}", suffix.replace('.', "_"));
    }
  }
  match raw.rsplit('.').next() {
    Some(last) => last.to_string(),
    None => raw.to_string(),
  }
}

/// ---------------------------------------------------------------------------
/// Timezone Offsets
/// ---------------------------------------------------------------------------

/// Convert a signed `±HH:MM` offset string into signed minutes. Anything
/// malformed or absent coerces to 0.
pub fn tz_offset_to_minutes(offset: Option<&str>) -> i64 {
  let Some(offset) = offset else { return 0 };
  let sign = match offset.chars().next() {
    Some('+') => 1,
    Some('-') => -1,
    _ => return 0,
  };
  let mut parts = offset[1..].splitn(2, ':');
  let (Some(hours), Some(minutes)) = (parts.next(), parts.next()) else {
    return 0;
  };
  match (hours.parse::<i64>(), minutes.parse::<i64>()) {
    (Ok(h), Ok(m)) if h >= 0 && m >= 0 => sign * (h * 60 + m),
    _ => 0,
  }
}

/// Offsets arrive as `±HH:MM` strings from the API; an already-numeric value
/// is minutes from an earlier normalization pass and goes through unchanged.
fn normalize_timezone_offset(value: &Json) -> Value {
  match value {
    Json::Number(n) => Value::Integer(
      n.as_i64()
        .or_else(|| n.as_f64().map(|f| f as i64))
        .unwrap_or(0),
    ),
    Json::String(s) => Value::Integer(tz_offset_to_minutes(Some(s))),
    _ => Value::Integer(0),
  }
}

/// ---------------------------------------------------------------------------
/// Coercion
/// ---------------------------------------------------------------------------

fn coerce(value: &Json, column_type: ColumnType) -> Value {
  match column_type {
    ColumnType::Datetime => coerce_datetime(value),
    ColumnType::Integer => coerce_integer(value),
    ColumnType::Float => coerce_float(value),
    ColumnType::Boolean => coerce_boolean(value),
    ColumnType::Text => coerce_text(value),
  }
}

fn coerce_datetime(value: &Json) -> Value {
  match value {
    Json::String(s) => DateTime::parse_from_rfc3339(s)
      .map(|dt| Value::Datetime(dt.with_timezone(&Utc)))
      .unwrap_or(Value::Null),
    _ => Value::Null,
  }
}

fn coerce_integer(value: &Json) -> Value {
  match value {
    Json::Number(n) => n
      .as_i64()
      .or_else(|| n.as_f64().map(|f| f as i64))
      .map(Value::Integer)
      .unwrap_or(Value::Null),
    Json::String(s) => {
      let trimmed = s.trim();
      trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| trimmed.parse::<f64>().ok().map(|f| f as i64))
        .map(Value::Integer)
        .unwrap_or(Value::Null)
    }
    Json::Bool(b) => Value::Integer(*b as i64),
    _ => Value::Null,
  }
}

fn coerce_float(value: &Json) -> Value {
  match value {
    Json::Number(n) => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
    Json::String(s) => s
      .trim()
      .parse::<f64>()
      .ok()
      .map(Value::Float)
      .unwrap_or(Value::Null),
    Json::Bool(b) => Value::Float(if *b { 1.0 } else { 0.0 }),
    _ => Value::Null,
  }
}

fn coerce_boolean(value: &Json) -> Value {
  match value {
    Json::Bool(b) => Value::Boolean(*b),
    Json::Number(n) => Value::Boolean(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
    Json::String(s) => Value::Boolean(!s.is_empty()),
    _ => Value::Null,
  }
}

fn coerce_text(value: &Json) -> Value {
  match value {
    Json::String(s) => Value::Text(s.clone()),
    Json::Number(n) => Value::Text(n.to_string()),
    Json::Bool(b) => Value::Text(b.to_string()),
    _ => Value::Null,
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_utils::{raw_cycle_json, raw_sleep_json};
  use serde_json::json;

  #[test]
  fn test_tz_offset_positive() {
    assert_eq!(tz_offset_to_minutes(Some("+02:30")), 150);
  }

  #[test]
  fn test_tz_offset_negative() {
    assert_eq!(tz_offset_to_minutes(Some("-01:15")), -75);
  }

  #[test]
  fn test_tz_offset_garbage() {
    assert_eq!(tz_offset_to_minutes(Some("garbage")), 0);
    assert_eq!(tz_offset_to_minutes(Some("+xx:yy")), 0);
    assert_eq!(tz_offset_to_minutes(Some("")), 0);
  }

  #[test]
  fn test_tz_offset_none() {
    assert_eq!(tz_offset_to_minutes(None), 0);
  }

  #[test]
  fn test_flatten_nested_paths() {
    let record = json!({
      "id": 7,
      "score": {
        "stage_summary": { "total_in_bed_time_milli": 123 },
        "strain": 9.5
      }
    });
    let flat = flatten(&record);
    assert_eq!(flat.get("id"), Some(&json!(7)));
    assert_eq!(
      flat.get("score.stage_summary.total_in_bed_time_milli"),
      Some(&json!(123))
    );
    assert_eq!(flat.get("score.strain"), Some(&json!(9.5)));
  }

  #[test]
  fn test_sleep_needed_prefix_is_kept() {
    assert_eq!(
      resolve_column_name("score.sleep_needed.baseline_milli", RecordType::Sleep),
      "sleep_needed_baseline_milli"
    );
  }

  #[test]
  fn test_stage_summary_prefix_is_stripped() {
    assert_eq!(
      resolve_column_name(
        "score.stage_summary.total_in_bed_time_milli",
        RecordType::Sleep
      ),
      "total_in_bed_time_milli"
    );
  }

  #[test]
  fn test_primary_key_rename_uses_last_endpoint_segment() {
    let raw = flatten(&raw_sleep_json("sleep-uuid-1"));
    let rows = normalize(&[raw], RecordType::Sleep);
    assert_eq!(
      rows[0].get("sleep_id"),
      Some(&Value::Text("sleep-uuid-1".into()))
    );
  }

  #[test]
  fn test_normalize_cycle_record() {
    let raw = flatten(&raw_cycle_json(93845));
    let rows = normalize(&[raw], RecordType::Cycle);
    let row = &rows[0];

    assert_eq!(row.get("cycle_id"), Some(&Value::Integer(93845)));
    assert_eq!(row.get("timezone_offset"), Some(&Value::Integer(60)));
    assert_eq!(row.get("strain"), Some(&Value::Float(9.2)));
    assert_eq!(row.get("average_heart_rate"), Some(&Value::Integer(62)));
    // the API does not return these links; they ride along as NULL
    assert_eq!(row.get("sleep_id"), Some(&Value::Null));
    assert_eq!(row.get("recovery_id"), Some(&Value::Null));
    // every schema column is present, nothing else
    assert_eq!(row.len(), RecordType::Cycle.columns().len());
  }

  #[test]
  fn test_unknown_fields_are_dropped() {
    let mut raw = flatten(&raw_cycle_json(1));
    raw.insert("score.some_new_field".into(), json!(42));
    let rows = normalize(&[raw], RecordType::Cycle);
    assert!(rows[0].get("some_new_field").is_none());
    assert_eq!(rows[0].len(), RecordType::Cycle.columns().len());
  }

  #[test]
  fn test_unparsable_values_become_null() {
    let mut raw = flatten(&raw_cycle_json(1));
    raw.insert("created_at".into(), json!("not-a-timestamp"));
    raw.insert("score.average_heart_rate".into(), json!("sixty"));
    let rows = normalize(&[raw], RecordType::Cycle);
    assert_eq!(rows[0].get("created_at"), Some(&Value::Null));
    assert_eq!(rows[0].get("average_heart_rate"), Some(&Value::Null));
  }

  #[test]
  fn test_numeric_text_is_parsed() {
    let mut raw = flatten(&raw_cycle_json(1));
    raw.insert("score.average_heart_rate".into(), json!("62"));
    raw.insert("score.kilojoule".into(), json!("8230.5"));
    let rows = normalize(&[raw], RecordType::Cycle);
    assert_eq!(rows[0].get("average_heart_rate"), Some(&Value::Integer(62)));
    assert_eq!(rows[0].get("kilojoule"), Some(&Value::Float(8230.5)));
  }

  #[test]
  fn test_boolean_truthiness() {
    assert_eq!(coerce_boolean(&json!(true)), Value::Boolean(true));
    assert_eq!(coerce_boolean(&json!(0)), Value::Boolean(false));
    assert_eq!(coerce_boolean(&json!(2)), Value::Boolean(true));
    assert_eq!(coerce_boolean(&json!("")), Value::Boolean(false));
    assert_eq!(coerce_boolean(&json!("yes")), Value::Boolean(true));
  }

  #[test]
  fn test_text_cast_from_scalars() {
    assert_eq!(coerce_text(&json!(12)), Value::Text("12".into()));
    assert_eq!(coerce_text(&json!(true)), Value::Text("true".into()));
    assert_eq!(coerce_text(&json!("plain")), Value::Text("plain".into()));
  }

  #[test]
  fn test_datetime_parse_keeps_utc_instant() {
    let v = coerce_datetime(&json!("2024-03-01T07:45:00.123Z"));
    match v {
      Value::Datetime(dt) => assert_eq!(dt.timestamp_millis(), 1_709_279_100_123),
      other => panic!("expected datetime, got {:?}", other),
    }
  }

  /// Converting a normalized row back to raw JSON shapes for a second pass.
  fn row_to_raw(row: &Row) -> RawRecord {
    row
      .iter()
      .map(|(name, value)| {
        let json = match value {
          Value::Datetime(dt) => json!(dt.to_rfc3339()),
          Value::Integer(i) => json!(i),
          Value::Float(f) => json!(f),
          Value::Boolean(b) => json!(b),
          Value::Text(s) => json!(s),
          Value::Null => Json::Null,
        };
        (name.clone(), json)
      })
      .collect()
  }

  #[test]
  fn test_normalize_is_idempotent() {
    for (record_type, raw) in [
      (RecordType::Cycle, flatten(&raw_cycle_json(42))),
      (RecordType::Sleep, flatten(&raw_sleep_json("sleep-uuid-9"))),
    ] {
      let once = normalize(&[raw], record_type);
      let again = normalize(&[row_to_raw(&once[0])], record_type);
      assert_eq!(once, again, "{} batch changed on re-normalization", record_type.name());
    }
  }
}
