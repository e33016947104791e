//! UTC calendar-day helpers used by the daily execution counters.

use chrono::{Duration, NaiveDate};

use crate::error::CoreError;
use crate::types::Timestamp;

/// Format of the `date` field on per-day counters.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Format a calendar day the way day counters are keyed.
pub fn format_day(day: NaiveDate) -> String {
    day.format(DATE_FORMAT).to_string()
}

/// The UTC calendar day of `at`, formatted as a counter key.
pub fn day_key(at: Timestamp) -> String {
    format_day(at.date_naive())
}

/// Every calendar day in `[begin, end]`, ascending.
///
/// Returns exactly `(end - begin).num_days() + 1` entries. An inverted range
/// is rejected rather than silently producing an empty list.
pub fn days_inclusive(begin: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>, CoreError> {
    if end < begin {
        return Err(CoreError::Validation(format!(
            "End date {end} is before begin date {begin}"
        )));
    }

    let span = (end - begin).num_days();
    Ok((0..=span).map(|offset| begin + Duration::days(offset)).collect())
}

/// Midnight UTC at the start of `day`.
pub fn start_of_day(day: NaiveDate) -> Timestamp {
    day.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Start of the day following `day`, in UTC.
///
/// Used as the exclusive upper bound when an end-date filter must include
/// the whole of that day.
pub fn start_of_next_day(day: NaiveDate) -> Timestamp {
    start_of_day(day + Duration::days(1))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
