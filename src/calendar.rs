//! Calendar enrichment: public holidays and school-holiday intervals.
//!
//! The two flags use intentionally different mechanisms. School holidays are
//! interval-valued: each `[start, end)` interval is decomposed into a pair of
//! point events (start -> 1, end -> 0) and the per-row flag is the value of
//! the latest event at or before the row's date (as-of join). The plain
//! holiday flag is a set-membership test on single dates and does not depend
//! on ordering at all.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A school-holiday period, half-open: `start_date` is on holiday,
/// `end_date` is the first day back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchoolHolidayInterval {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// A point event carrying the school-holiday state from its date onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarEvent {
    pub date: NaiveDate,
    pub on_holiday: u8,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CalendarError {
    #[error("calendar events are not date-ordered at index {index}")]
    UnsortedEvents { index: usize },
    #[error("rows are not date-ordered at index {index}")]
    UnsortedRows { index: usize },
}

/// Decomposes intervals into a date-ordered event stream.
///
/// Ties sort end events (0) before start events (1), so when one interval
/// ends the same day another starts the carried state stays 1 and back-to-back
/// holiday periods read as continuous.
pub fn school_holiday_events(intervals: &[SchoolHolidayInterval]) -> Vec<CalendarEvent> {
    let mut events = Vec::with_capacity(intervals.len() * 2);
    for interval in intervals {
        events.push(CalendarEvent {
            date: interval.start_date,
            on_holiday: 1,
        });
        events.push(CalendarEvent {
            date: interval.end_date,
            on_holiday: 0,
        });
    }
    events.sort_by_key(|e| (e.date, e.on_holiday));
    events
}

/// As-of join of the event stream onto a date-sorted row axis.
///
/// For each date in `row_days`, yields the `on_holiday` value of the most
/// recent event with `event.date <= day`, or 0 when no event precedes the
/// row. Both inputs must be non-decreasing in date so a single merge sweep
/// suffices; violations are rejected up front.
pub fn school_holiday_flags(
    row_days: &[NaiveDate],
    events: &[CalendarEvent],
) -> Result<Vec<u8>, CalendarError> {
    for (index, pair) in events.windows(2).enumerate() {
        if pair[1].date < pair[0].date {
            return Err(CalendarError::UnsortedEvents { index: index + 1 });
        }
    }
    for (index, pair) in row_days.windows(2).enumerate() {
        if pair[1] < pair[0] {
            return Err(CalendarError::UnsortedRows { index: index + 1 });
        }
    }

    let mut flags = Vec::with_capacity(row_days.len());
    let mut cursor = 0usize;
    let mut current = 0u8;
    for day in row_days {
        while cursor < events.len() && events[cursor].date <= *day {
            current = events[cursor].on_holiday;
            cursor += 1;
        }
        flags.push(current);
    }
    Ok(flags)
}

/// Membership test against the public-holiday date set.
pub fn holiday_flags(row_days: &[NaiveDate], holidays: &[NaiveDate]) -> Vec<bool> {
    let set: HashSet<NaiveDate> = holidays.iter().copied().collect();
    row_days.iter().map(|day| set.contains(day)).collect()
}
