//! Date Resolver
//!
//! Converts date expressions into epoch-millisecond timestamps:
//!
//! - `today`, `yesterday`: UTC midnight of that day
//! - `<N><unit>` with unit `d`, `w`, `m`, `y`: N days/weeks/months/years
//!   before now, snapped to UTC midnight
//! - ISO-8601 dates and datetimes (`2024-01-15`, `2024-01-15T10:30:00Z`)
//! - numeric timestamps, passed through unchanged
//!
//! Months and years are fixed 30 and 365 day spans, not calendar arithmetic.
//! `3m` on March 31st lands on March 1st, not December 31st.

use crate::query::ast::QueryValue;
use crate::query::error::{QueryError, QueryResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Milliseconds in one day
pub const DAY_MS: i64 = 24 * 3600 * 1000;

const RELATIVE_PATTERN: &str = r"^(\d+)([dwmy])$";
const ISO_PREFIX_PATTERN: &str = r"^\d{4}-\d{2}-\d{2}";

/// Resolve a date expression relative to the current time
pub fn resolve_date(value: &str) -> QueryResult<i64> {
    resolve_date_at(value, Utc::now())
}

/// Resolve a date expression relative to `now`
pub fn resolve_date_at(value: &str, now: DateTime<Utc>) -> QueryResult<i64> {
    let s = value.trim();
    let lower = s.to_lowercase();

    match lower.as_str() {
        "today" => return Ok(midnight(now)),
        "yesterday" => return Ok(midnight(now) - DAY_MS),
        _ => {}
    }

    if let Some(ts) = parse_relative(&lower, now)? {
        return Ok(ts);
    }

    if let Some(ts) = parse_iso(s) {
        return Ok(ts);
    }

    if let Ok(ts) = s.parse::<i64>() {
        return Ok(ts);
    }

    Err(QueryError::InvalidDate(value.to_string()))
}

/// Resolve a clause value that must denote a point in time
pub fn resolve_value_at(value: &QueryValue, now: DateTime<Utc>) -> QueryResult<i64> {
    match value {
        QueryValue::Integer(ts) => Ok(*ts),
        QueryValue::Float(f) if f.is_finite() => Ok(f.trunc() as i64),
        QueryValue::Text(s) => resolve_date_at(s, now),
        other => Err(QueryError::InvalidDate(other.to_string())),
    }
}

/// True when the string is a relative or ISO date token.
///
/// Plain numbers are not considered dates here; they only resolve as
/// timestamps on date columns.
pub fn looks_like_date(value: &str) -> bool {
    let lower = value.trim().to_lowercase();
    if lower == "today" || lower == "yesterday" {
        return true;
    }

    let relative = regex::Regex::new(RELATIVE_PATTERN)
        .map(|re| re.is_match(&lower))
        .unwrap_or(false);
    if relative {
        return true;
    }

    let iso_prefix = regex::Regex::new(ISO_PREFIX_PATTERN)
        .map(|re| re.is_match(&lower))
        .unwrap_or(false);
    iso_prefix && parse_iso(value.trim()).is_some()
}

/// UTC midnight of the day containing `dt`
fn midnight(dt: DateTime<Utc>) -> i64 {
    let ms = dt.timestamp_millis();
    ms - ms.rem_euclid(DAY_MS)
}

fn parse_relative(s: &str, now: DateTime<Utc>) -> QueryResult<Option<i64>> {
    let re = regex::Regex::new(RELATIVE_PATTERN)
        .map_err(|e| QueryError::InvalidDate(format!("{}: {}", s, e)))?;

    let Some(caps) = re.captures(s) else {
        return Ok(None);
    };

    let amount: i64 = caps[1]
        .parse()
        .map_err(|_| QueryError::InvalidDate(s.to_string()))?;

    let days_per_unit = match &caps[2] {
        "d" => 1,
        "w" => 7,
        "m" => 30,
        "y" => 365,
        _ => return Ok(None),
    };

    let offset = amount
        .checked_mul(days_per_unit)
        .and_then(|days| days.checked_mul(DAY_MS))
        .ok_or_else(|| QueryError::InvalidDate(s.to_string()))?;

    Ok(Some(midnight(now) - offset))
}

fn parse_iso(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }

    const DATETIME_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
    ];
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive).timestamp_millis());
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis())
}
