// src/normalize/cast.rs

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};

use crate::model::{ColumnType, Value};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
];

/// Trim whitespace and strip one pair of outer quotes.
pub fn clean_str(raw: &str) -> &str {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].trim()
    } else {
        trimmed
    }
}

/// Text is cleaned; blank text counts as missing.
pub fn clean_value(v: &Value) -> Value {
    match v {
        Value::Text(s) => {
            let c = clean_str(s);
            if c.is_empty() {
                Value::Null
            } else {
                Value::Text(c.to_string())
            }
        }
        other => other.clone(),
    }
}

fn all_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

/// `YYYYMMDD`, sliced by hand so the year cannot swallow the month.
fn parse_compact_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 8 || !all_digits(s) {
        return None;
    }
    NaiveDate::from_ymd_opt(
        s[0..4].parse().ok()?,
        s[4..6].parse().ok()?,
        s[6..8].parse().ok()?,
    )
}

/// `YYYYMMDDTHHMMSSZ`, the raw partition stamp.
fn parse_compact_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let b = s.as_bytes();
    if b.len() != 16 || b[8] != b'T' || b[15] != b'Z' || !all_digits(&s[9..15]) {
        return None;
    }
    let date = parse_compact_date(&s[0..8])?;
    let time = NaiveTime::from_hms_opt(
        s[9..11].parse().ok()?,
        s[11..13].parse().ok()?,
        s[13..15].parse().ok()?,
    )?;
    Some(NaiveDateTime::new(date, time).and_utc())
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    if let Some(d) = parse_compact_date(s) {
        return Some(d);
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|dt| dt.date())
}

/// Naive forms are taken as UTC; a bare date is midnight UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(ts) = parse_compact_timestamp(s) {
        return Some(ts);
    }
    if let Some(dt) = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    {
        return Some(dt.and_utc());
    }
    parse_date(s).map(|d| d.and_time(NaiveTime::MIN).and_utc())
}

/// Convert an already-cleaned, non-null value to `ty`. The error is a
/// human-readable detail for the rejection report.
pub fn cast_to(value: &Value, ty: ColumnType) -> Result<Value, String> {
    let fail = || format!("cannot cast {value:?} to {}", ty.as_str());
    match (ty, value) {
        (_, Value::Null) => Ok(Value::Null),

        (ColumnType::Text, Value::Text(_)) => Ok(value.clone()),
        (ColumnType::Text, Value::Number(n)) => Ok(Value::Text(n.to_string())),
        (ColumnType::Text, Value::Date(d)) => Ok(Value::Text(d.format("%Y-%m-%d").to_string())),
        (ColumnType::Text, Value::Timestamp(ts)) => Ok(Value::Text(
            ts.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        )),

        (ColumnType::Number, Value::Number(_)) => Ok(value.clone()),
        (ColumnType::Number, Value::Text(s)) => {
            s.parse::<f64>().map(Value::Number).map_err(|_| fail())
        }

        (ColumnType::Date, Value::Date(_)) => Ok(value.clone()),
        (ColumnType::Date, Value::Timestamp(ts)) => Ok(Value::Date(ts.date_naive())),
        (ColumnType::Date, Value::Text(s)) => parse_date(s).map(Value::Date).ok_or_else(fail),
        (ColumnType::Date, Value::Number(n)) if n.fract() == 0.0 && *n >= 0.0 => {
            parse_compact_date(&format!("{n:.0}"))
                .map(Value::Date)
                .ok_or_else(fail)
        }

        (ColumnType::Timestamp, Value::Timestamp(_)) => Ok(value.clone()),
        (ColumnType::Timestamp, Value::Date(d)) => {
            Ok(Value::Timestamp(d.and_time(NaiveTime::MIN).and_utc()))
        }
        (ColumnType::Timestamp, Value::Text(s)) => {
            parse_timestamp(s).map(Value::Timestamp).ok_or_else(fail)
        }

        _ => Err(fail()),
    }
}
