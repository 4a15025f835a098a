//! Dense daily time grid construction.
//!
//! Lag and rolling computations downstream require a contiguous daily index
//! per line: a `shift(k)` over a grid with reporting gaps would silently skip
//! calendar days and "k days ago" would stop meaning k days ago. The grid is
//! the cross product of every distinct line with the full global date span,
//! left-joined against the observed counts.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use thiserror::Error;
use tracing::info;

/// One aggregated observation: total validations for a line on a reporting day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyCount {
    pub line: String,
    pub day: NaiveDate,
    pub count: i64,
}

/// A cell of the dense grid. `count` is `None` on days with no report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridRow {
    pub line: String,
    pub day: NaiveDate,
    pub count: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridConfig {
    /// Extra days appended after the last observed date, so rows exist for
    /// dates that still need a forecast.
    pub forward_horizon_days: i64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            forward_horizon_days: 0,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GridError {
    #[error("cannot build a time grid from an empty observation set")]
    EmptyInput,
    #[error("inverted date range: min {min} > max {max}")]
    InvalidRange { min: NaiveDate, max: NaiveDate },
}

/// Builds the dense `(line, day)` grid spanning the observed range plus the
/// configured forward horizon. Every line shares the same global date axis.
/// Output is sorted by `(line, day)` with exactly one row per pair.
pub fn build_time_grid(
    counts: &[DailyCount],
    cfg: &GridConfig,
) -> Result<Vec<GridRow>, GridError> {
    if counts.is_empty() {
        return Err(GridError::EmptyInput);
    }

    let min_day = counts.iter().map(|c| c.day).min().expect("non-empty");
    let max_day = counts.iter().map(|c| c.day).max().expect("non-empty");
    if min_day > max_day {
        return Err(GridError::InvalidRange {
            min: min_day,
            max: max_day,
        });
    }
    // A negative horizon can pull the end of the axis before its start.
    let end_day = max_day + Duration::days(cfg.forward_horizon_days);
    if end_day < min_day {
        return Err(GridError::InvalidRange {
            min: min_day,
            max: end_day,
        });
    }

    // BTreeMap keeps lines sorted and deduplicates (line, day) collisions
    // upstream aggregation should already have removed.
    let mut observed: BTreeMap<(&str, NaiveDate), i64> = BTreeMap::new();
    for c in counts {
        observed.insert((c.line.as_str(), c.day), c.count);
    }
    let lines: Vec<&str> = {
        let mut lines: Vec<&str> = counts.iter().map(|c| c.line.as_str()).collect();
        lines.sort_unstable();
        lines.dedup();
        lines
    };

    let days_per_line = (end_day - min_day).num_days() + 1;
    let mut rows = Vec::with_capacity(lines.len() * days_per_line as usize);
    for line in &lines {
        let mut day = min_day;
        while day <= end_day {
            rows.push(GridRow {
                line: (*line).to_string(),
                day,
                count: observed.get(&(*line, day)).copied(),
            });
            day = day.succ_opt().expect("date overflow building grid");
        }
    }

    info!(
        component = "grid",
        event = "grid.built",
        lines = lines.len(),
        start_day = %min_day,
        end_day = %end_day,
        rows = rows.len()
    );

    Ok(rows)
}
