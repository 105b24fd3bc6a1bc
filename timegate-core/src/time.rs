//! Time handling utilities for timegate

use chrono::{DateTime, Duration, SecondsFormat, Utc};

use crate::error::{GateError, GateResult};

/// Parse a Go-style duration string (e.g. "1h", "100h", "30m", "1h30m").
///
/// Supported units: `ns`, `us`/`µs`, `ms`, `s`, `m`, `h`, `d`, `w`.
/// Multiple components may be concatenated. The result must be positive.
pub fn parse_duration(s: &str) -> GateResult<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(GateError::Parse("empty duration".to_string()));
    }

    let mut total_nanos: i64 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| GateError::Parse(format!("duration '{}' is missing a unit", s)))?;
        if digits_end == 0 {
            return Err(GateError::Parse(format!("invalid duration '{}'", s)));
        }
        let value: f64 = rest[..digits_end]
            .parse()
            .map_err(|_| GateError::Parse(format!("invalid duration '{}'", s)))?;
        rest = &rest[digits_end..];

        let (unit_nanos, unit_len) = if rest.starts_with("ns") {
            (1i64, 2)
        } else if rest.starts_with("us") || rest.starts_with("\u{b5}s") {
            (1_000, if rest.starts_with("us") { 2 } else { 3 })
        } else if rest.starts_with("ms") {
            (1_000_000, 2)
        } else if rest.starts_with('s') {
            (1_000_000_000, 1)
        } else if rest.starts_with('m') {
            (60 * 1_000_000_000, 1)
        } else if rest.starts_with('h') {
            (3_600 * 1_000_000_000, 1)
        } else if rest.starts_with('d') {
            (86_400 * 1_000_000_000, 1)
        } else if rest.starts_with('w') {
            (7 * 86_400 * 1_000_000_000, 1)
        } else {
            return Err(GateError::Parse(format!(
                "unknown unit in duration '{}'",
                s
            )));
        };
        rest = &rest[unit_len..];
        total_nanos = total_nanos
            .checked_add((value * unit_nanos as f64) as i64)
            .ok_or_else(|| GateError::Parse(format!("duration '{}' overflows", s)))?;
    }

    if total_nanos <= 0 {
        return Err(GateError::Parse(format!(
            "duration '{}' must be positive",
            s
        )));
    }
    Ok(Duration::nanoseconds(total_nanos))
}

/// Render a duration back into the Go-style string form, largest units
/// first: `90m` becomes `1h30m`.
pub fn format_duration(d: Duration) -> String {
    let mut nanos = d.num_nanoseconds().unwrap_or(i64::MAX);
    let units: [(&str, i64); 6] = [
        ("h", 3_600 * 1_000_000_000),
        ("m", 60 * 1_000_000_000),
        ("s", 1_000_000_000),
        ("ms", 1_000_000),
        ("us", 1_000),
        ("ns", 1),
    ];
    let mut out = String::new();
    for (suffix, unit) in units {
        if nanos >= unit {
            out.push_str(&format!("{}{}", nanos / unit, suffix));
            nanos %= unit;
        }
    }
    if out.is_empty() {
        out.push_str("0s");
    }
    out
}

/// Render a timestamp the way the query language quotes them: RFC 3339 with
/// a `Z` suffix, second precision when there is no sub-second component.
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    if t.timestamp_subsec_nanos() == 0 {
        t.to_rfc3339_opts(SecondsFormat::Secs, true)
    } else {
        t.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }
}

/// Parse a quoted timestamp literal.
pub fn parse_timestamp(s: &str) -> GateResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| GateError::TimeRange(format!("invalid timestamp '{}': {}", s, e)))
}

/// Serde adapter for duration fields expressed as Go-style strings.
pub mod duration_serde {
    use super::{format_duration, parse_duration};
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn serialize<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*d))
    }
}
