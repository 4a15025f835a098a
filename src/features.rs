//! Ridership feature table construction.
//!
//! Turns the dense daily grid into model-ready rows: per-line lag columns,
//! leakage-safe rolling means, calendar datetime parts, and the two holiday
//! flags. Every transform is a pure pass over immutable row sets; missing
//! counts stay `None` through every derived column.
//!
//! The rolling means deliberately end `avg_lag` days before the target row.
//! A trailing mean ending "today" would feed same-day ridership into the
//! feature for that day; the offset mirrors the smallest lag horizon so all
//! features respect the same forecast latency.

use std::collections::HashSet;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::calendar::{
    holiday_flags, school_holiday_events, school_holiday_flags, CalendarError,
    SchoolHolidayInterval,
};
use crate::grid::{build_time_grid, DailyCount, GridConfig, GridError, GridRow};

pub const FEATURE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureDType {
    F64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub dtype: FeatureDType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<FeatureColumn>,
}

/// One output row, values aligned with the schema columns. `None` marks an
/// absent value (lag before the line's history starts, empty rolling window).
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub line: String,
    pub day: NaiveDate,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Lag horizons in days, one `lag_<k>` column each.
    pub lag_days: Vec<u32>,
    /// Rolling mean widths in days, one `avg_lag_<avg_lag>_window_<w>`
    /// column each.
    pub rolling_widths: Vec<u32>,
    /// Days between a rolling window's end and the target row. Must stay in
    /// step with the smallest lag horizon.
    pub avg_lag: u32,
    pub schema_version: u32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lag_days: vec![3, 4, 5, 6, 7, 14, 21, 28, 35],
            rolling_widths: vec![3, 7, 30, 90],
            avg_lag: 3,
            schema_version: FEATURE_SCHEMA_VERSION,
        }
    }
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("invalid feature config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Calendar(#[from] CalendarError),
}

pub fn build_feature_schema(cfg: &FeatureConfig) -> FeatureSchema {
    let mut columns = Vec::new();
    for lag in &cfg.lag_days {
        columns.push(column(format!("lag_{lag}")));
    }
    for width in &cfg.rolling_widths {
        columns.push(column(format!("avg_lag_{}_window_{width}", cfg.avg_lag)));
    }
    for name in [
        "day_of_month",
        "day_of_year",
        "month",
        "year",
        "week",
        "weekday",
        "is_school_holiday",
        "is_holiday",
    ] {
        columns.push(column(name.to_string()));
    }

    let fingerprint = schema_fingerprint(cfg, &columns);

    info!(
        component = "features",
        event = "features.schema.built",
        version = cfg.schema_version,
        lags = ?cfg.lag_days,
        rolling_widths = ?cfg.rolling_widths,
        avg_lag = cfg.avg_lag,
        column_count = columns.len(),
        fingerprint = fingerprint
    );

    FeatureSchema {
        version: cfg.schema_version,
        fingerprint,
        columns,
    }
}

/// Full pipeline: dense grid, lag/rolling columns, datetime parts, calendar
/// flags. Output rows are sorted by `(day, line)`, the snapshot ordering the
/// walk-forward splitter indexes into.
pub fn build_feature_table(
    counts: &[DailyCount],
    holidays: &[NaiveDate],
    school_intervals: &[SchoolHolidayInterval],
    cfg: &FeatureConfig,
    grid_cfg: &GridConfig,
) -> Result<(FeatureSchema, Vec<FeatureRow>), FeatureError> {
    validate_config(cfg)?;

    info!(
        component = "features",
        event = "features.build.start",
        observations = counts.len(),
        holidays = holidays.len(),
        school_intervals = school_intervals.len(),
        forward_horizon_days = grid_cfg.forward_horizon_days
    );

    let schema = build_feature_schema(cfg);
    let grid = build_time_grid(counts, grid_cfg)?;

    let mut rows = Vec::with_capacity(grid.len());
    for group in line_slices(&grid) {
        append_group_rows(group, cfg, schema.columns.len(), &mut rows);
    }

    // Snapshot ordering for splitting and export.
    rows.sort_by(|a, b| (a.day, a.line.as_str()).cmp(&(b.day, b.line.as_str())));

    let row_days: Vec<NaiveDate> = rows.iter().map(|r| r.day).collect();
    let events = school_holiday_events(school_intervals);
    let school = school_holiday_flags(&row_days, &events)?;
    let public = holiday_flags(&row_days, holidays);

    let school_idx = schema.columns.len() - 2;
    let holiday_idx = schema.columns.len() - 1;
    for (row, (school_flag, holiday_flag)) in
        rows.iter_mut().zip(school.into_iter().zip(public.into_iter()))
    {
        row.values[school_idx] = Some(f64::from(school_flag));
        row.values[holiday_idx] = Some(if holiday_flag { 1.0 } else { 0.0 });
    }

    info!(
        component = "features",
        event = "features.build.finish",
        rows = rows.len(),
        columns = schema.columns.len()
    );

    Ok((schema, rows))
}

fn validate_config(cfg: &FeatureConfig) -> Result<(), FeatureError> {
    if cfg.schema_version != FEATURE_SCHEMA_VERSION {
        return Err(FeatureError::InvalidConfig(format!(
            "schema_version must equal FEATURE_SCHEMA_VERSION ({FEATURE_SCHEMA_VERSION})"
        )));
    }
    if cfg.avg_lag == 0 {
        return Err(FeatureError::InvalidConfig(
            "avg_lag must be at least 1 day".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for lag in &cfg.lag_days {
        if *lag == 0 {
            return Err(FeatureError::InvalidConfig(
                "lag_days entries must be > 0".to_string(),
            ));
        }
        if !seen.insert(*lag) {
            return Err(FeatureError::InvalidConfig(
                "lag_days entries must be unique".to_string(),
            ));
        }
    }

    let mut seen = HashSet::new();
    for width in &cfg.rolling_widths {
        if *width == 0 {
            return Err(FeatureError::InvalidConfig(
                "rolling_widths entries must be > 0".to_string(),
            ));
        }
        if !seen.insert(*width) {
            return Err(FeatureError::InvalidConfig(
                "rolling_widths entries must be unique".to_string(),
            ));
        }
    }

    Ok(())
}

/// Contiguous per-line slices of the `(line, day)`-sorted grid.
fn line_slices(grid: &[GridRow]) -> impl Iterator<Item = &[GridRow]> {
    grid.chunk_by(|a, b| a.line == b.line)
}

fn append_group_rows(
    group: &[GridRow],
    cfg: &FeatureConfig,
    column_count: usize,
    rows: &mut Vec<FeatureRow>,
) {
    let counts: Vec<Option<f64>> = group.iter().map(|r| r.count.map(|n| n as f64)).collect();

    // Prefix sums over present values; the grid is dense so window membership
    // is positional and each window is O(1) instead of a rescan per row.
    let mut sum_prefix = vec![0.0f64; counts.len() + 1];
    let mut present_prefix = vec![0u32; counts.len() + 1];
    for (i, value) in counts.iter().enumerate() {
        sum_prefix[i + 1] = sum_prefix[i] + value.unwrap_or(0.0);
        present_prefix[i + 1] = present_prefix[i] + u32::from(value.is_some());
    }

    for (i, cell) in group.iter().enumerate() {
        let mut values = Vec::with_capacity(column_count);

        for lag in &cfg.lag_days {
            let lag = *lag as usize;
            values.push(if i >= lag { counts[i - lag] } else { None });
        }

        for width in &cfg.rolling_widths {
            values.push(window_mean(
                &sum_prefix,
                &present_prefix,
                i,
                *width as usize,
                cfg.avg_lag as usize,
            ));
        }

        let day = cell.day;
        values.push(Some(f64::from(day.day())));
        values.push(Some(f64::from(day.ordinal())));
        values.push(Some(f64::from(day.month())));
        values.push(Some(day.year() as f64));
        values.push(Some(f64::from(day.iso_week().week())));
        values.push(Some(f64::from(day.weekday().num_days_from_monday())));
        // Calendar flags are filled after the (day, line) resort.
        values.push(None);
        values.push(None);

        rows.push(FeatureRow {
            line: cell.line.clone(),
            day,
            values,
        });
    }
}

/// Mean of present counts over positions `[i - (width + avg_lag), i - avg_lag]`
/// inclusive, clamped at the start of the group. `None` when the window holds
/// no present value or lies entirely before the group.
fn window_mean(
    sum_prefix: &[f64],
    present_prefix: &[u32],
    i: usize,
    width: usize,
    avg_lag: usize,
) -> Option<f64> {
    if i < avg_lag {
        return None;
    }
    let hi = i - avg_lag;
    let lo = i.saturating_sub(width + avg_lag);
    let present = present_prefix[hi + 1] - present_prefix[lo];
    if present == 0 {
        return None;
    }
    let sum = sum_prefix[hi + 1] - sum_prefix[lo];
    Some(sum / f64::from(present))
}

fn column(name: String) -> FeatureColumn {
    FeatureColumn {
        name,
        dtype: FeatureDType::F64,
    }
}

fn schema_fingerprint(cfg: &FeatureConfig, columns: &[FeatureColumn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{};", cfg.schema_version));
    hasher.update(format!("avg_lag:{};", cfg.avg_lag));
    hasher.update("lags:");
    for lag in &cfg.lag_days {
        hasher.update(format!("{lag},"));
    }
    hasher.update(";widths:");
    for width in &cfg.rolling_widths {
        hasher.update(format!("{width},"));
    }
    hasher.update(";columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(":f64;");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("valid date")
    }

    fn count(line: &str, day: NaiveDate, n: i64) -> DailyCount {
        DailyCount {
            line: line.to_string(),
            day,
            count: n,
        }
    }

    fn small_cfg() -> FeatureConfig {
        FeatureConfig {
            lag_days: vec![1, 2],
            rolling_widths: vec![2],
            avg_lag: 1,
            schema_version: FEATURE_SCHEMA_VERSION,
        }
    }

    fn column_index(schema: &FeatureSchema, name: &str) -> usize {
        schema
            .columns
            .iter()
            .position(|c| c.name == name)
            .expect("column must exist")
    }

    #[test]
    fn schema_order_and_fingerprint_are_deterministic() {
        let cfg = FeatureConfig::default();
        let schema_a = build_feature_schema(&cfg);
        let schema_b = build_feature_schema(&cfg);

        assert_eq!(schema_a, schema_b);
        assert_eq!(schema_a.columns.len(), 9 + 4 + 8);
        assert_eq!(schema_a.columns[0].name, "lag_3");
        assert_eq!(schema_a.columns[8].name, "lag_35");
        assert_eq!(schema_a.columns[9].name, "avg_lag_3_window_3");
        assert_eq!(schema_a.columns[12].name, "avg_lag_3_window_90");
        assert_eq!(schema_a.columns[13].name, "day_of_month");
        assert_eq!(schema_a.columns[19].name, "is_school_holiday");
        assert_eq!(schema_a.columns[20].name, "is_holiday");
    }

    #[test]
    fn fingerprint_tracks_config_changes() {
        let base = build_feature_schema(&FeatureConfig::default());
        let changed = build_feature_schema(&FeatureConfig {
            rolling_widths: vec![3, 7, 30],
            ..FeatureConfig::default()
        });
        assert_ne!(base.fingerprint, changed.fingerprint);
    }

    #[test]
    fn config_validation_rejects_degenerate_values() {
        let counts = vec![count("A", d(2023, 1, 1), 1), count("A", d(2023, 1, 8), 1)];
        let grid_cfg = GridConfig::default();

        for bad in [
            FeatureConfig {
                avg_lag: 0,
                ..FeatureConfig::default()
            },
            FeatureConfig {
                lag_days: vec![3, 3],
                ..FeatureConfig::default()
            },
            FeatureConfig {
                rolling_widths: vec![0],
                ..FeatureConfig::default()
            },
            FeatureConfig {
                schema_version: FEATURE_SCHEMA_VERSION + 1,
                ..FeatureConfig::default()
            },
        ] {
            let err = build_feature_table(&counts, &[], &[], &bad, &grid_cfg).unwrap_err();
            assert!(matches!(err, FeatureError::InvalidConfig(_)));
        }
    }

    #[test]
    fn lags_read_exactly_k_days_back_within_a_line() {
        let counts = vec![
            count("A", d(2023, 1, 1), 10),
            count("A", d(2023, 1, 2), 20),
            count("A", d(2023, 1, 3), 30),
            count("A", d(2023, 1, 4), 40),
        ];
        let (schema, rows) =
            build_feature_table(&counts, &[], &[], &small_cfg(), &GridConfig::default()).unwrap();

        let lag_1 = column_index(&schema, "lag_1");
        let lag_2 = column_index(&schema, "lag_2");
        assert_eq!(rows[0].values[lag_1], None);
        assert_eq!(rows[1].values[lag_1], Some(10.0));
        assert_eq!(rows[3].values[lag_1], Some(30.0));
        assert_eq!(rows[0].values[lag_2], None);
        assert_eq!(rows[1].values[lag_2], None);
        assert_eq!(rows[3].values[lag_2], Some(20.0));
    }

    #[test]
    fn lag_of_an_empty_grid_cell_is_absent() {
        let counts = vec![count("A", d(2023, 1, 1), 10), count("A", d(2023, 1, 3), 30)];
        let (schema, rows) =
            build_feature_table(&counts, &[], &[], &small_cfg(), &GridConfig::default()).unwrap();
        let lag_1 = column_index(&schema, "lag_1");
        // 2023-01-03 looks back at the gap day 2023-01-02.
        assert_eq!(rows[2].values[lag_1], None);
    }

    #[test]
    fn lags_never_cross_a_line_boundary() {
        let counts = vec![
            count("A", d(2023, 1, 1), 100),
            count("A", d(2023, 1, 2), 100),
            count("B", d(2023, 1, 1), 1),
            count("B", d(2023, 1, 2), 2),
        ];
        let (schema, rows) =
            build_feature_table(&counts, &[], &[], &small_cfg(), &GridConfig::default()).unwrap();
        let lag_1 = column_index(&schema, "lag_1");

        let b_day2 = rows
            .iter()
            .find(|r| r.line == "B" && r.day == d(2023, 1, 2))
            .unwrap();
        assert_eq!(b_day2.values[lag_1], Some(1.0));
        let b_day1 = rows
            .iter()
            .find(|r| r.line == "B" && r.day == d(2023, 1, 1))
            .unwrap();
        assert_eq!(b_day1.values[lag_1], None);
    }

    #[test]
    fn rolling_mean_covers_the_offset_window_inclusively() {
        let counts: Vec<DailyCount> = (1..=8)
            .map(|day| count("A", d(2023, 1, day), i64::from(day) * 10))
            .collect();
        let cfg = FeatureConfig {
            lag_days: vec![2],
            rolling_widths: vec![3],
            avg_lag: 2,
            schema_version: FEATURE_SCHEMA_VERSION,
        };
        let (schema, rows) =
            build_feature_table(&counts, &[], &[], &cfg, &GridConfig::default()).unwrap();
        let avg = column_index(&schema, "avg_lag_2_window_3");

        // Row 2023-01-08: window is days [08 - 5, 08 - 2] = 03..=06.
        assert_eq!(rows[7].values[avg], Some((30.0 + 40.0 + 50.0 + 60.0) / 4.0));
        // Row 2023-01-03: window clamps to 01..=01.
        assert_eq!(rows[2].values[avg], Some(10.0));
        // Rows closer than avg_lag to the start have no window at all.
        assert_eq!(rows[0].values[avg], None);
        assert_eq!(rows[1].values[avg], None);
    }

    #[test]
    fn rolling_mean_of_an_all_empty_window_is_absent_not_zero() {
        let counts = vec![count("A", d(2023, 1, 1), 5), count("A", d(2023, 1, 10), 5)];
        let cfg = FeatureConfig {
            lag_days: vec![1],
            rolling_widths: vec![2],
            avg_lag: 2,
            schema_version: FEATURE_SCHEMA_VERSION,
        };
        let (schema, rows) =
            build_feature_table(&counts, &[], &[], &cfg, &GridConfig::default()).unwrap();
        let avg = column_index(&schema, "avg_lag_2_window_2");

        // Row 2023-01-07: window 03..=05, all gap days.
        assert_eq!(rows[6].day, d(2023, 1, 7));
        assert_eq!(rows[6].values[avg], None);
    }

    #[test]
    fn datetime_parts_match_chrono() {
        let counts = vec![count("A", d(2023, 7, 13), 1), count("A", d(2023, 7, 14), 1)];
        let (schema, rows) =
            build_feature_table(&counts, &[], &[], &small_cfg(), &GridConfig::default()).unwrap();
        let row = &rows[1];
        assert_eq!(row.day, d(2023, 7, 14));
        assert_eq!(row.values[column_index(&schema, "day_of_month")], Some(14.0));
        assert_eq!(row.values[column_index(&schema, "day_of_year")], Some(195.0));
        assert_eq!(row.values[column_index(&schema, "month")], Some(7.0));
        assert_eq!(row.values[column_index(&schema, "year")], Some(2023.0));
        assert_eq!(row.values[column_index(&schema, "week")], Some(28.0));
        // 2023-07-14 is a Friday.
        assert_eq!(row.values[column_index(&schema, "weekday")], Some(4.0));
    }

    #[test]
    fn output_is_sorted_by_day_then_line() {
        let counts = vec![
            count("B", d(2023, 1, 2), 2),
            count("A", d(2023, 1, 1), 1),
            count("A", d(2023, 1, 2), 3),
        ];
        let (_, rows) =
            build_feature_table(&counts, &[], &[], &small_cfg(), &GridConfig::default()).unwrap();
        let keys: Vec<(NaiveDate, &str)> = rows.iter().map(|r| (r.day, r.line.as_str())).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
