//! `Date` header parsing.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{Error, Result};

/// Parses a `Date` header into a UTC instant.
///
/// Tries strict RFC 2822 first, then common deviations seen in the wild:
/// trailing comments such as `(UTC)`, named zones (`GMT`, `UT`, `UTC`, `Z`),
/// missing seconds, and RFC 3339 timestamps. A value with no zone at all is
/// taken as UTC.
///
/// # Errors
///
/// Returns [`Error::InvalidDate`] when no format matches.
pub fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    let cleaned = normalize(value);
    if let Ok(dt) = DateTime::parse_from_rfc2822(&cleaned) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    let without_weekday = cleaned
        .split_once(',')
        .map_or(cleaned.as_str(), |(_, rest)| rest.trim());
    for format in ["%d %b %Y %H:%M %z", "%d %b %Y %H:%M:%S %z"] {
        if let Ok(dt) = DateTime::parse_from_str(without_weekday, format) {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    for format in ["%d %b %Y %H:%M:%S", "%d %b %Y %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(without_weekday, format) {
            return Ok(naive.and_utc());
        }
    }

    Err(Error::InvalidDate(value.to_string()))
}

/// Formats an instant for a `Date` header.
#[must_use]
pub fn format_date(dt: &DateTime<Utc>) -> String {
    dt.to_rfc2822()
}

/// Drops comments and rewrites named UTC zones as `+0000`.
fn normalize(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut depth = 0usize;
    for c in value.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }

    let mut words: Vec<&str> = out.split_whitespace().collect();
    if let Some(last) = words.last_mut()
        && ["GMT", "UT", "UTC", "Z"]
            .iter()
            .any(|zone| last.eq_ignore_ascii_case(zone))
    {
        *last = "+0000";
    }
    words.join(" ")
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_rfc2822() {
        assert_eq!(
            parse_date("Tue, 1 Jul 2003 10:52:37 +0200").unwrap(),
            utc(2003, 7, 1, 8, 52, 37)
        );
    }

    #[test]
    fn test_comment_and_named_zone() {
        assert_eq!(
            parse_date("Wed, 03 Jan 2024 09:00:00 +0000 (UTC)").unwrap(),
            utc(2024, 1, 3, 9, 0, 0)
        );
        assert_eq!(
            parse_date("Wed, 03 Jan 2024 09:00:00 GMT").unwrap(),
            utc(2024, 1, 3, 9, 0, 0)
        );
    }

    #[test]
    fn test_lenient_forms() {
        assert_eq!(
            parse_date("3 Jan 2024 09:00 -0100").unwrap(),
            utc(2024, 1, 3, 10, 0, 0)
        );
        assert_eq!(
            parse_date("2024-01-03T09:00:00Z").unwrap(),
            utc(2024, 1, 3, 9, 0, 0)
        );
        assert_eq!(
            parse_date("Wed, 3 Jan 2024 09:00:00").unwrap(),
            utc(2024, 1, 3, 9, 0, 0)
        );
    }

    #[test]
    fn test_invalid() {
        assert!(matches!(parse_date("yesterday"), Err(Error::InvalidDate(_))));
        assert!(parse_date("").is_err());
    }

    #[test]
    fn test_format_round_trip() {
        let dt = utc(2024, 2, 29, 23, 59, 1);
        assert_eq!(parse_date(&format_date(&dt)).unwrap(), dt);
    }
}
