//! Scalar coercions from raw CSV text.
//!
//! Every function here is total: bad input yields `None` (or `false`),
//! never an error. Callers decide between default, null and skip.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

/// Canonical 8-4-4-4-12 hex form, any case.
static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("UUID pattern compiles")
});

/// Truthy spellings, compared case-insensitively.
pub const TRUTHY: [&str; 6] = ["true", "1", "yes", "on", "active", "t"];

/// Naive layouts tried before the permissive parser.
const DATETIME_FORMATS: [&str; 8] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M:%S",
];

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

/// Parse a canonical UUID. Surrounding whitespace is ignored.
pub fn parse_uuid(raw: &str) -> Option<Uuid> {
    let raw = raw.trim();
    if !UUID_RE.is_match(raw) {
        return None;
    }
    Uuid::parse_str(raw).ok()
}

/// Parse an integer. Finite decimals are truncated toward zero.
pub fn parse_integer(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Some(i);
    }
    let f = parse_float(raw)?;
    let truncated = f.trunc();
    if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return None;
    }
    Some(truncated as i64)
}

/// Parse a finite float.
pub fn parse_float(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Truthy vocabulary check; anything else is false.
pub fn parse_boolean(raw: &str) -> bool {
    let raw = raw.trim();
    TRUTHY.iter().any(|t| t.eq_ignore_ascii_case(raw))
}

/// Parse a timestamp into UTC.
///
/// Inputs carrying an offset are converted to UTC; naive inputs are taken
/// as UTC already. Slash dates read month first.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(d.and_time(NaiveTime::MIN));
        }
    }

    dateparser::parse_with(raw, &Utc, NaiveTime::MIN)
        .ok()
        .map(|dt| dt.naive_utc())
}

/// Parse a calendar date.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    parse_timestamp(raw).map(|dt| dt.date())
}
