//! Timestamp parsing and rendering for the listing endpoint.
//!
//! `since` arrives as `YYYY-MM-DD HH:MM:SS[.ffffff]±HH:MM`. Query-string
//! decoding turns the `+` of a positive offset into a space, and the offset
//! colon does not match the `%z` pattern, so both are repaired before parsing.
//! A value that still fails to parse disables the filter instead of failing
//! the request.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use tracing::warn;

/// Pattern accepted by `expire`.
pub const EXPIRE_PATTERN: &str = "%Y-%m-%d %H:%M:%S";

/// Signed URLs created without an explicit `expire` stay valid until
/// 2183-09-08 13:15:00 UTC.
pub fn default_expiry() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2183, 9, 8, 13, 15, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Rewrite a trailing `±HH:MM` (or ` HH:MM` after query decoding) into `±HHMM`.
///
/// Anything else is returned unchanged, including strings whose last `:`
/// belongs to the time of day.
pub fn normalize_offset(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let len = bytes.len();
    if len < 6 || bytes[len - 3] != b':' {
        return raw.to_string();
    }

    let tail = &bytes[len - 6..];
    let sign = match tail[0] {
        b' ' | b'+' => '+',
        b'-' => '-',
        _ => return raw.to_string(),
    };
    let digits = [tail[1], tail[2], tail[4], tail[5]];
    if !digits.iter().all(u8::is_ascii_digit) {
        return raw.to_string();
    }

    // tail is pure ASCII, so len - 6 is a char boundary
    let mut out = String::with_capacity(len - 1);
    out.push_str(&raw[..len - 6]);
    out.push(sign);
    out.extend(digits.iter().map(|&b| b as char));
    out
}

/// Parse a `since` filter value with `pattern`.
///
/// Values without an offset are accepted when the offset-free form of the
/// pattern matches, and are read as UTC. Returns `None` (and logs a warning)
/// when nothing matches.
pub fn parse_since(raw: &str, pattern: &str) -> Option<DateTime<FixedOffset>> {
    let normalized = normalize_offset(raw.trim_end());

    match DateTime::parse_from_str(&normalized, pattern) {
        Ok(ts) => Some(ts),
        Err(err) => {
            if pattern.contains("%z") {
                let naive_pattern = pattern.replace("%z", "");
                if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, &naive_pattern) {
                    return Some(naive.and_utc().fixed_offset());
                }
            }
            warn!("{}", err);
            warn!("couldn't parse datetime from since: {}", raw);
            None
        }
    }
}

/// Parse an `expire` value, read as UTC.
pub fn parse_expire(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(raw, EXPIRE_PATTERN).map(|naive| naive.and_utc())
}

/// Render an update time as `YYYY-MM-DD HH:MM:SS[.ffffff]+00:00`.
pub fn format_updated(ts: DateTime<Utc>) -> String {
    if ts.timestamp_subsec_micros() == 0 {
        ts.format("%Y-%m-%d %H:%M:%S%:z").to_string()
    } else {
        ts.format("%Y-%m-%d %H:%M:%S%.6f%:z").to_string()
    }
}
