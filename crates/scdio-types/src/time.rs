//! Timestamp normalisation for values that arrive from clients.
//!
//! Everything is stored in the same shape SQLite produces with
//! `strftime('%Y-%m-%d %H:%M:%f', 'now')`, so string comparison in SQL
//! matches chronological order.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Storage format for timestamps (UTC, millisecond precision).
pub const STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Accepts RFC 3339, `datetime-local` style values and bare dates.
/// Naive values are taken as UTC.
pub fn parse_datetime(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(input, fmt) {
            return Some(ndt.and_utc());
        }
    }

    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| ndt.and_utc())
}

pub fn normalize_datetime(input: &str) -> Option<String> {
    parse_datetime(input).map(|dt| format_storage(&dt))
}

/// Reduces any accepted timestamp to `YYYY-MM-DD`.
pub fn normalize_date(input: &str) -> Option<String> {
    let input = input.trim();
    if let Ok(d) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Some(d.format("%Y-%m-%d").to_string());
    }
    parse_datetime(input).map(|dt| dt.format("%Y-%m-%d").to_string())
}

pub fn format_storage(dt: &DateTime<Utc>) -> String {
    dt.format(STORAGE_FORMAT).to_string()
}

pub fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}
