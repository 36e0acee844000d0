//! Pipeline orchestration: fetch -> normalize -> validate -> upsert, once per
//! record type, with per-type failure isolation
//!
//! One record type's failure at any stage is recorded and the run moves on to
//! the next type; there is no transaction spanning record types.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::db::{self, DbPool, StorageError};
use crate::normalize;
use crate::schema::RecordType;
use crate::snapshot;
use crate::validate::{self, ValidationError};
use crate::whoop::{self, FetchError, WhoopConfig};

/// ---------------------------------------------------------------------------
/// Time Windows
/// ---------------------------------------------------------------------------

const LOOKBACK_DAYS: i64 = 7;
const END_LAG_DAYS: i64 = 1;
pub const DEFAULT_PAGE_LIMIT: u32 = 25;

/// Fetch window passed to every endpoint as `start`/`end` query parameters.
#[derive(Debug, Clone)]
pub struct TimeWindow {
  pub start: DateTime<Utc>,
  pub end: DateTime<Utc>,
}

impl TimeWindow {
  pub fn start_param(&self) -> String {
    format_timestamp(&self.start)
  }

  pub fn end_param(&self) -> String {
    format_timestamp(&self.end)
  }
}

/// The API expects a fixed millisecond UTC format.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
  ts.format("%Y-%m-%dT%H:%M:%S.000Z").to_string()
}

/// Derive the fetch window: start 7 days before the newest stored cycle to
/// re-fetch anything revised upstream, falling back to the 2024-01-01 floor
/// on an empty warehouse; end one day back so partial same-day records are
/// never ingested.
pub async fn resolve_window(pool: &DbPool) -> Result<TimeWindow, StorageError> {
  let start = match db::max_cycle_created_at(pool).await? {
    Some(max) => max - Duration::days(LOOKBACK_DAYS),
    None => Utc
      .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
      .single()
      .unwrap_or_else(Utc::now),
  };
  let end = Utc::now() - Duration::days(END_LAG_DAYS);
  Ok(TimeWindow { start, end })
}

/// ---------------------------------------------------------------------------
/// Run Outcomes
/// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum TypeOutcome {
  Success { rows_written: u64 },
  FetchFailed(FetchError),
  ValidationFailed(ValidationError),
  StorageFailed(StorageError),
}

impl TypeOutcome {
  pub fn is_success(&self) -> bool {
    matches!(self, TypeOutcome::Success { .. })
  }
}

/// Per-type results of one full run.
#[derive(Debug)]
pub struct RunReport {
  pub outcomes: Vec<(RecordType, TypeOutcome)>,
}

impl RunReport {
  pub fn all_succeeded(&self) -> bool {
    self.outcomes.iter().all(|(_, outcome)| outcome.is_success())
  }
}

/// ---------------------------------------------------------------------------
/// Orchestration
/// ---------------------------------------------------------------------------

/// Run the full pipeline for one window. Record types are processed
/// sequentially in dependency order (cycle first); one type's failure never
/// aborts the others.
pub async fn run(
  config: &WhoopConfig,
  pool: &DbPool,
  access_token: &str,
  window: &TimeWindow,
) -> RunReport {
  let mut outcomes = Vec::with_capacity(RecordType::ALL.len());

  for record_type in RecordType::ALL {
    let outcome = run_record_type(config, pool, access_token, record_type, window).await;
    match &outcome {
      TypeOutcome::Success { rows_written } => {
        println!("{}: upserted {} row(s)", record_type.name(), rows_written);
      }
      TypeOutcome::FetchFailed(e) => {
        eprintln!("{}: fetch failed: {}", record_type.name(), e);
      }
      TypeOutcome::ValidationFailed(e) => {
        eprintln!("{}: validation failed: {}", record_type.name(), e);
      }
      TypeOutcome::StorageFailed(e) => {
        eprintln!("{}: upsert failed: {}", record_type.name(), e);
      }
    }
    outcomes.push((record_type, outcome));
  }

  RunReport { outcomes }
}

async fn run_record_type(
  config: &WhoopConfig,
  pool: &DbPool,
  access_token: &str,
  record_type: RecordType,
  window: &TimeWindow,
) -> TypeOutcome {
  let raw = match whoop::fetch_all(config, access_token, record_type, window, DEFAULT_PAGE_LIMIT)
    .await
  {
    Ok(raw) => raw,
    Err(e) => return TypeOutcome::FetchFailed(e),
  };

  let batch = normalize::normalize(&raw, record_type);

  if let Err(e) = validate::validate(&batch, record_type) {
    return TypeOutcome::ValidationFailed(e);
  }

  if let Some(dir) = &config.snapshot_dir {
    // Snapshots are observational; a write failure must not fail the run.
    if let Err(e) = snapshot::write_snapshot(dir, record_type, &batch) {
      eprintln!(
        "Warning: failed to write {} snapshot: {}",
        record_type.name(),
        e
      );
    }
  }

  match db::upsert_batch(pool, record_type, &batch).await {
    Ok(rows_written) => TypeOutcome::Success { rows_written },
    Err(e) => TypeOutcome::StorageFailed(e),
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
