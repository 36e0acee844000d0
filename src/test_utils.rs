//! Test utilities and helpers for integration and unit testing
//!
//! This module provides common test infrastructure including:
//! - Database setup/teardown
//! - Raw API record factories
//! - Fetcher test fixtures

use chrono::{TimeZone, Utc};
use serde_json::{json, Value as Json};
use sqlx::SqlitePool;

use crate::pipeline::TimeWindow;
use crate::whoop::WhoopConfig;

/// ---------------------------------------------------------------------------
/// Database Test Utilities
/// ---------------------------------------------------------------------------

/// Create an in-memory SQLite database for testing
/// Runs all migrations and returns a ready-to-use pool
///
/// Uses max_connections(1) to prevent multiple pool connections from creating
/// isolated in-memory databases, which would cause intermittent test failures
pub async fn setup_test_db() -> SqlitePool {
  let pool = sqlx::sqlite::SqlitePoolOptions::new()
    .max_connections(1)
    .connect("sqlite::memory:")
    .await
    .expect("Failed to create in-memory database");

  sqlx::migrate!("./migrations")
    .run(&pool)
    .await
    .expect("Failed to run migrations");

  pool
}

/// Close a test database pool
pub async fn teardown_test_db(pool: SqlitePool) {
  pool.close().await;
}

/// ---------------------------------------------------------------------------
/// Raw API Record Factories
/// ---------------------------------------------------------------------------

/// A cycle record as the collection endpoint returns it.
pub fn raw_cycle_json(cycle_id: i64) -> Json {
  json!({
    "id": cycle_id,
    "user_id": 10129,
    "created_at": "2024-03-01T07:45:00.123Z",
    "updated_at": "2024-03-01T09:00:00.000Z",
    "start": "2024-02-29T22:10:00.000Z",
    "end": "2024-03-01T06:05:00.000Z",
    "timezone_offset": "+01:00",
    "score_state": "SCORED",
    "score": {
      "strain": 9.2,
      "kilojoule": 8230.5,
      "average_heart_rate": 62,
      "max_heart_rate": 142
    }
  })
}

/// A sleep record, nested two levels deep under `score`.
pub fn raw_sleep_json(sleep_id: &str) -> Json {
  json!({
    "id": sleep_id,
    "v1_id": 1043,
    "user_id": 10129,
    "created_at": "2024-03-01T07:40:00.000Z",
    "updated_at": "2024-03-01T08:10:00.000Z",
    "start": "2024-02-29T22:15:00.000Z",
    "end": "2024-03-01T06:00:00.000Z",
    "timezone_offset": "-05:00",
    "nap": false,
    "score_state": "SCORED",
    "score": {
      "stage_summary": {
        "total_in_bed_time_milli": 30272735,
        "total_awake_time_milli": 1403507,
        "total_no_data_time_milli": 0,
        "total_light_sleep_time_milli": 14905851,
        "total_slow_wave_sleep_time_milli": 6630370,
        "total_rem_sleep_time_milli": 5879573,
        "sleep_cycle_count": 3,
        "disturbance_count": 12
      },
      "sleep_needed": {
        "baseline_milli": 27395866,
        "need_from_sleep_debt_milli": 352230,
        "need_from_recent_strain_milli": 208595,
        "need_from_recent_nap_milli": -12312
      },
      "respiratory_rate": 16.11,
      "sleep_performance_percentage": 98.0,
      "sleep_consistency_percentage": 90.0,
      "sleep_efficiency_percentage": 91.69
    }
  })
}

/// A recovery record; keys on the sleep it was computed from.
pub fn raw_recovery_json(sleep_id: &str, cycle_id: i64) -> Json {
  json!({
    "cycle_id": cycle_id,
    "sleep_id": sleep_id,
    "user_id": 10129,
    "created_at": "2024-03-01T07:50:00.000Z",
    "updated_at": "2024-03-01T07:55:00.000Z",
    "score_state": "SCORED",
    "score": {
      "user_calibrating": false,
      "recovery_score": 44,
      "resting_heart_rate": 64,
      "hrv_rmssd_milli": 31.813562,
      "spo2_percentage": 95.6875,
      "skin_temp_celsius": 33.7
    }
  })
}

/// A scored workout record with zone durations.
pub fn raw_workout_json(workout_id: &str) -> Json {
  json!({
    "id": workout_id,
    "v1_id": 1043,
    "user_id": 10129,
    "created_at": "2024-03-01T18:30:00.000Z",
    "updated_at": "2024-03-01T18:45:00.000Z",
    "start": "2024-03-01T17:30:00.000Z",
    "end": "2024-03-01T18:15:00.000Z",
    "timezone_offset": "-05:00",
    "sport_name": "running",
    "score_state": "SCORED",
    "sport_id": 1,
    "score": {
      "strain": 8.2493,
      "average_heart_rate": 123,
      "max_heart_rate": 146,
      "kilojoule": 1569.34033,
      "percent_recorded": 100.0,
      "distance_meter": 1772.77035,
      "altitude_gain_meter": 46.64384,
      "altitude_change_meter": -0.781891,
      "zone_durations": {
        "zone_zero_milli": 13458,
        "zone_one_milli": 389370,
        "zone_two_milli": 388367,
        "zone_three_milli": 71137,
        "zone_four_milli": 0,
        "zone_five_milli": 0
      }
    }
  })
}

/// ---------------------------------------------------------------------------
/// Fetcher Fixtures
/// ---------------------------------------------------------------------------

/// Build one page of a collection response body.
pub fn page_body(records: &[Json], next_token: Option<&str>) -> String {
  json!({
    "records": records,
    "next_token": next_token,
  })
  .to_string()
}

/// A config pointing every endpoint at a test server.
pub fn test_config(base_url: &str) -> WhoopConfig {
  WhoopConfig {
    client_id: "test-client".into(),
    client_secret: "test-secret".into(),
    redirect_uri: "http://localhost:8767/callback".into(),
    api_base_url: base_url.into(),
    cycle_api_base_url: base_url.into(),
    database_url: "sqlite::memory:".into(),
    snapshot_dir: None,
  }
}

/// A fixed fetch window for fetcher tests.
pub fn test_window() -> TimeWindow {
  TimeWindow {
    start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("start"),
    end: Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).single().expect("end"),
  }
}
