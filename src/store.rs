//! Sqlite loading of raw validation counts and calendar tables.
//!
//! The raw `validations` table is one row per ticketing report: a reporting
//! day, three line-identifying codes, and a textual entry count (the source
//! censors small counts as "Moins de 5"). Loading normalizes the codes into a
//! composite line key and aggregates duplicate `(day, line)` reports by sum,
//! producing the observation set the grid builder consumes.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rusqlite::Connection;
use thiserror::Error;
use tracing::{info, warn};

use crate::calendar::SchoolHolidayInterval;
use crate::grid::DailyCount;

/// Censored counts below the reporting threshold are published as this
/// sentinel and read back as 4.
const CENSORED_COUNT_SENTINEL: &str = "Moins de 5";
const CENSORED_COUNT_VALUE: i64 = 4;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid date value '{value}' in column {column}")]
    InvalidDate { column: &'static str, value: String },
    #[error("invalid entry count '{value}' on {day}")]
    InvalidCount { day: NaiveDate, value: String },
}

/// Location/population selection applied to the school-holiday table. The
/// source publishes every academy and audience; the models only care about
/// one city and the student calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchoolHolidayFilter {
    pub location: String,
    pub populations: Vec<String>,
}

impl Default for SchoolHolidayFilter {
    fn default() -> Self {
        Self {
            location: "Paris".to_string(),
            populations: vec!["-".to_string(), "Élèves".to_string()],
        }
    }
}

/// Loads, cleans, and aggregates the `validations` table into per-line daily
/// totals sorted by `(day, line)`.
///
/// Rows whose code columns do not parse as integers are dropped (the source
/// uses free-form placeholders for unidentified lines); a malformed entry
/// count is an error rather than a silent zero.
pub fn load_daily_counts(conn: &Connection) -> Result<Vec<DailyCount>, StoreError> {
    let mut stmt = conn.prepare(
        "
        SELECT day, transport_code, network_code, line_code, entry_count
        FROM validations
        ",
    )?;

    let mut totals: BTreeMap<(NaiveDate, String), i64> = BTreeMap::new();
    let mut dropped = 0usize;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let day_raw: String = row.get(0)?;
        let transport: String = row.get(1)?;
        let network: String = row.get(2)?;
        let line_code: String = row.get(3)?;
        let entry_count: String = row.get(4)?;

        let day = parse_day("day", &day_raw)?;
        let Some(line) = composite_line_key(&transport, &network, &line_code) else {
            dropped += 1;
            continue;
        };
        let count = parse_entry_count(day, &entry_count)?;
        *totals.entry((day, line)).or_insert(0) += count;
    }

    if dropped > 0 {
        warn!(
            component = "store",
            event = "store.validations.rows_dropped",
            dropped,
            reason = "unparseable line codes"
        );
    }

    let counts: Vec<DailyCount> = totals
        .into_iter()
        .map(|((day, line), count)| DailyCount { line, day, count })
        .collect();

    info!(
        component = "store",
        event = "store.validations.loaded",
        daily_counts = counts.len()
    );

    Ok(counts)
}

/// Public-holiday dates, ascending.
pub fn load_holidays(conn: &Connection) -> Result<Vec<NaiveDate>, StoreError> {
    let mut stmt = conn.prepare("SELECT date FROM holidays ORDER BY date ASC")?;
    let mut holidays = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let raw: String = row.get(0)?;
        holidays.push(parse_day("date", &raw)?);
    }

    info!(
        component = "store",
        event = "store.holidays.loaded",
        holidays = holidays.len()
    );

    Ok(holidays)
}

/// School-holiday intervals for the filtered location/populations, ordered by
/// start date.
pub fn load_school_holidays(
    conn: &Connection,
    filter: &SchoolHolidayFilter,
) -> Result<Vec<SchoolHolidayInterval>, StoreError> {
    let mut stmt = conn.prepare(
        "
        SELECT start_date, end_date, population
        FROM school_holidays
        WHERE location = ?1
        ORDER BY start_date ASC
        ",
    )?;

    let mut intervals = Vec::new();
    let mut rows = stmt.query([&filter.location])?;
    while let Some(row) = rows.next()? {
        let start_raw: String = row.get(0)?;
        let end_raw: String = row.get(1)?;
        let population: String = row.get(2)?;
        if !filter.populations.iter().any(|p| *p == population) {
            continue;
        }
        intervals.push(SchoolHolidayInterval {
            start_date: parse_day("start_date", &start_raw)?,
            end_date: parse_day("end_date", &end_raw)?,
        });
    }

    info!(
        component = "store",
        event = "store.school_holidays.loaded",
        location = %filter.location,
        intervals = intervals.len()
    );

    Ok(intervals)
}

fn composite_line_key(transport: &str, network: &str, line_code: &str) -> Option<String> {
    let transport: i64 = transport.trim().parse().ok()?;
    let network: i64 = network.trim().parse().ok()?;
    let line_code: i64 = line_code.trim().parse().ok()?;
    Some(format!("{transport}__{network}__{line_code}"))
}

fn parse_entry_count(day: NaiveDate, raw: &str) -> Result<i64, StoreError> {
    let trimmed = raw.trim();
    if trimmed == CENSORED_COUNT_SENTINEL {
        return Ok(CENSORED_COUNT_VALUE);
    }
    match trimmed.parse::<i64>() {
        Ok(count) if count >= 0 => Ok(count),
        _ => Err(StoreError::InvalidCount {
            day,
            value: raw.to_string(),
        }),
    }
}

/// Dates are stored as ISO text; datetime values are truncated to their date
/// part before parsing.
fn parse_day(column: &'static str, raw: &str) -> Result<NaiveDate, StoreError> {
    let trimmed = raw.trim();
    let date_part = trimmed
        .split(|c| c == 'T' || c == ' ')
        .next()
        .unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|_| StoreError::InvalidDate {
        column,
        value: raw.to_string(),
    })
}
