//! Flat-file snapshots of each run's normalized batches
//!
//! Purely observational output; the pipeline never reads these back.

use chrono::SecondsFormat;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::normalize::{Row, Value};
use crate::schema::RecordType;

/// Write one record type's normalized batch as `<dir>/<table>_data.csv`,
/// columns in schema order.
pub fn write_snapshot(
  dir: &Path,
  record_type: RecordType,
  batch: &[Row],
) -> std::io::Result<PathBuf> {
  fs::create_dir_all(dir)?;
  let path = dir.join(format!("{}_data.csv", record_type.table()));
  let mut file = fs::File::create(&path)?;

  let columns = record_type.columns();
  let header = columns
    .iter()
    .map(|(name, _)| *name)
    .collect::<Vec<_>>()
    .join(",");
  writeln!(file, "{}", header)?;

  for row in batch {
    let line = columns
      .iter()
      .map(|(name, _)| row.get(*name).map(csv_field).unwrap_or_default())
      .collect::<Vec<_>>()
      .join(",");
    writeln!(file, "{}", line)?;
  }

  Ok(path)
}

fn csv_field(value: &Value) -> String {
  let text = match value {
    Value::Datetime(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
    Value::Integer(i) => i.to_string(),
    Value::Float(f) => f.to_string(),
    Value::Boolean(b) => b.to_string(),
    Value::Text(s) => s.clone(),
    Value::Null => String::new(),
  };
  if text.contains(',') || text.contains('"') || text.contains('\n') {
    format!("\"{}\"", text.replace('"', "\"\""))
  } else {
    text
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
