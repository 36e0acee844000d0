//! Schema registry for the four WHOOP fact tables
//!
//! Column lists, type categories and primary keys live here once and are
//! consulted at runtime by the normalizer, validator and upsert writer.
//! Adding a record type means adding a registry entry plus endpoint mapping.

use serde::{Deserialize, Serialize};

/// ---------------------------------------------------------------------------
/// Record Types
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
  Cycle,
  Sleep,
  Recovery,
  Workout,
}

impl RecordType {
  /// All record types in write order. Cycles go first so sleep and recovery
  /// rows referencing a cycle land after their parent.
  pub const ALL: [RecordType; 4] = [
    RecordType::Cycle,
    RecordType::Sleep,
    RecordType::Recovery,
    RecordType::Workout,
  ];

  pub fn name(&self) -> &'static str {
    match self {
      RecordType::Cycle => "cycle",
      RecordType::Sleep => "sleep",
      RecordType::Recovery => "recovery",
      RecordType::Workout => "workout",
    }
  }

  /// API endpoint path relative to the base URL.
  pub fn endpoint(&self) -> &'static str {
    match self {
      RecordType::Cycle => "cycle",
      RecordType::Sleep => "activity/sleep",
      RecordType::Recovery => "recovery",
      RecordType::Workout => "activity/workout",
    }
  }

  /// The cycle collection is served from a different base URL than the other
  /// three endpoints.
  pub fn uses_cycle_base(&self) -> bool {
    matches!(self, RecordType::Cycle)
  }

  /// Target warehouse table.
  pub fn table(&self) -> &'static str {
    match self {
      RecordType::Cycle => "fact_cycle",
      RecordType::Sleep => "fact_activity_sleep",
      RecordType::Recovery => "fact_recovery",
      RecordType::Workout => "fact_workout",
    }
  }

  /// Primary key column. Named after the last path segment of the endpoint
  /// (`activity/sleep` keys on `sleep_id`); recovery shares the sleep key.
  pub fn primary_key(&self) -> &'static str {
    match self {
      RecordType::Cycle => "cycle_id",
      RecordType::Sleep => "sleep_id",
      RecordType::Recovery => "sleep_id",
      RecordType::Workout => "workout_id",
    }
  }

  /// Ordered column list for the target table.
  pub fn columns(&self) -> &'static [(&'static str, ColumnType)] {
    match self {
      RecordType::Cycle => CYCLE_COLUMNS,
      RecordType::Sleep => SLEEP_COLUMNS,
      RecordType::Recovery => RECOVERY_COLUMNS,
      RecordType::Workout => WORKOUT_COLUMNS,
    }
  }
}

/// ---------------------------------------------------------------------------
/// Column Types
/// ---------------------------------------------------------------------------

/// Semantic type category driving normalization coercion and validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
  Datetime,
  Integer,
  Float,
  Boolean,
  Text,
}

impl ColumnType {
  pub fn name(&self) -> &'static str {
    match self {
      ColumnType::Datetime => "datetime",
      ColumnType::Integer => "integer",
      ColumnType::Float => "float",
      ColumnType::Boolean => "boolean",
      ColumnType::Text => "text",
    }
  }
}

/// ---------------------------------------------------------------------------
/// Column Definitions
/// ---------------------------------------------------------------------------

const CYCLE_COLUMNS: &[(&str, ColumnType)] = &[
  ("cycle_id", ColumnType::Integer),
  ("user_id", ColumnType::Integer),
  ("created_at", ColumnType::Datetime),
  ("updated_at", ColumnType::Datetime),
  ("start", ColumnType::Datetime),
  ("end", ColumnType::Datetime),
  ("timezone_offset", ColumnType::Integer),
  ("state", ColumnType::Text),
  ("strain", ColumnType::Float),
  ("kilojoule", ColumnType::Float),
  ("average_heart_rate", ColumnType::Integer),
  ("max_heart_rate", ColumnType::Integer),
  ("sleep_id", ColumnType::Text),
  ("recovery_id", ColumnType::Text),
];

const SLEEP_COLUMNS: &[(&str, ColumnType)] = &[
  ("sleep_id", ColumnType::Text),
  ("cycle_id", ColumnType::Integer),
  ("v1_id", ColumnType::Integer),
  ("user_id", ColumnType::Integer),
  ("created_at", ColumnType::Datetime),
  ("updated_at", ColumnType::Datetime),
  ("start", ColumnType::Datetime),
  ("end", ColumnType::Datetime),
  ("timezone_offset", ColumnType::Integer),
  ("nap", ColumnType::Boolean),
  ("state", ColumnType::Text),
  ("total_in_bed_time_milli", ColumnType::Integer),
  ("total_awake_time_milli", ColumnType::Integer),
  ("total_no_data_time_milli", ColumnType::Integer),
  ("total_light_sleep_time_milli", ColumnType::Integer),
  ("total_slow_wave_sleep_time_milli", ColumnType::Integer),
  ("total_rem_sleep_time_milli", ColumnType::Integer),
  ("sleep_cycle_count", ColumnType::Integer),
  ("disturbance_count", ColumnType::Integer),
  ("sleep_needed_baseline_milli", ColumnType::Integer),
  ("sleep_needed_need_from_sleep_debt_milli", ColumnType::Integer),
  ("sleep_needed_need_from_recent_strain_milli", ColumnType::Integer),
  ("sleep_needed_need_from_recent_nap_milli", ColumnType::Integer),
  ("respiratory_rate", ColumnType::Float),
  ("sleep_performance_percentage", ColumnType::Float),
  ("sleep_consistency_percentage", ColumnType::Float),
  ("sleep_efficiency_percentage", ColumnType::Float),
];

const RECOVERY_COLUMNS: &[(&str, ColumnType)] = &[
  ("sleep_id", ColumnType::Text),
  ("cycle_id", ColumnType::Integer),
  ("user_id", ColumnType::Integer),
  ("created_at", ColumnType::Datetime),
  ("updated_at", ColumnType::Datetime),
  ("state", ColumnType::Text),
  ("user_calibrating", ColumnType::Boolean),
  ("recovery_score", ColumnType::Integer),
  ("resting_heart_rate", ColumnType::Integer),
  ("hrv_rmssd_milli", ColumnType::Float),
  ("spo2_percentage", ColumnType::Float),
  ("skin_temp_celsius", ColumnType::Float),
];

const WORKOUT_COLUMNS: &[(&str, ColumnType)] = &[
  ("workout_id", ColumnType::Text),
  ("v1_id", ColumnType::Integer),
  ("user_id", ColumnType::Integer),
  ("created_at", ColumnType::Datetime),
  ("updated_at", ColumnType::Datetime),
  ("start", ColumnType::Datetime),
  ("end", ColumnType::Datetime),
  ("timezone_offset", ColumnType::Integer),
  ("sport_name", ColumnType::Text),
  ("state", ColumnType::Text),
  ("sport_id", ColumnType::Integer),
  ("strain", ColumnType::Float),
  ("average_heart_rate", ColumnType::Integer),
  ("max_heart_rate", ColumnType::Integer),
  ("kilojoule", ColumnType::Float),
  ("percent_recorded", ColumnType::Float),
  ("distance_meter", ColumnType::Float),
  ("altitude_gain_meter", ColumnType::Float),
  ("altitude_change_meter", ColumnType::Float),
  ("zone_zero_milli", ColumnType::Integer),
  ("zone_one_milli", ColumnType::Integer),
  ("zone_two_milli", ColumnType::Integer),
  ("zone_three_milli", ColumnType::Integer),
  ("zone_four_milli", ColumnType::Integer),
  ("zone_five_milli", ColumnType::Integer),
];

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
