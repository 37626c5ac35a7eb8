//! Lightweight UTC date/time utilities (no chrono dependency).
//!
//! Uses Howard Hinnant's civil_from_days / days_from_civil algorithms for
//! conversions between Unix time and calendar dates. Timestamps travel through
//! the engine as ISO-8601 strings.

use std::time::{SystemTime, UNIX_EPOCH};

const SECS_PER_DAY: i64 = 86_400;

/// Current UTC time as Unix seconds.
pub fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Current UTC timestamp in ISO-8601 format.
pub fn now_iso8601() -> String {
    unix_to_iso8601(now_unix_secs())
}

/// Convert Unix seconds to ISO-8601 UTC string.
pub fn unix_to_iso8601(secs: u64) -> String {
    let days = (secs / 86400) as i64;
    let time_of_day = secs % 86400;
    let hours = time_of_day / 3600;
    let minutes = (time_of_day % 3600) / 60;
    let seconds = time_of_day % 60;

    let (y, m, d) = civil_from_days(days);
    format!("{y:04}-{m:02}-{d:02}T{hours:02}:{minutes:02}:{seconds:02}Z")
}

/// Parse an ISO-8601 timestamp into Unix seconds.
///
/// Accepts `YYYY-MM-DD`, optionally followed by `THH:MM[:SS[.fff]]` (a space
/// separator also works) and a `Z` or `±HH:MM` offset. Returns `None` for
/// anything else.
pub fn parse_iso8601(s: &str) -> Option<i64> {
    let s = s.trim();
    let date = s.get(..10)?;
    let year: i64 = date.get(0..4)?.parse().ok()?;
    if date.as_bytes().get(4) != Some(&b'-') || date.as_bytes().get(7) != Some(&b'-') {
        return None;
    }
    let month: u64 = date.get(5..7)?.parse().ok()?;
    let day: u64 = date.get(8..10)?.parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }

    let mut secs = days_from_civil(year, month, day) * SECS_PER_DAY;

    let rest = &s[10..];
    if rest.is_empty() {
        return Some(secs);
    }
    let rest = rest.strip_prefix('T').or_else(|| rest.strip_prefix(' '))?;

    let hours: i64 = rest.get(0..2)?.parse().ok()?;
    if rest.as_bytes().get(2) != Some(&b':') {
        return None;
    }
    let minutes: i64 = rest.get(3..5)?.parse().ok()?;
    let mut tail = &rest[5..];
    let mut seconds = 0;
    if let Some(after) = tail.strip_prefix(':') {
        seconds = after.get(0..2)?.parse().ok()?;
        tail = &after[2..];
    }
    if hours > 23 || minutes > 59 || seconds > 60 {
        return None;
    }
    secs += hours * 3600 + minutes * 60 + seconds;

    // Fractional seconds carry no weight at day granularity.
    if let Some(after) = tail.strip_prefix('.') {
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        tail = &after[digits..];
    }

    match tail {
        "" | "Z" | "z" => Some(secs),
        offset => {
            let sign = match offset.as_bytes().first()? {
                b'+' => 1,
                b'-' => -1,
                _ => return None,
            };
            let off = &offset[1..];
            let off_h: i64 = off.get(0..2)?.parse().ok()?;
            let off_m: i64 = match off.get(2..) {
                Some("") | None => 0,
                Some(m) => m.trim_start_matches(':').parse().ok()?,
            };
            Some(secs - sign * (off_h * 3600 + off_m * 60))
        }
    }
}

/// Re-render a parsed timestamp in the canonical `YYYY-MM-DDTHH:MM:SSZ` form,
/// whose text order is time order. `None` if unparseable or before 1970.
pub fn normalize_iso8601(s: &str) -> Option<String> {
    let secs = parse_iso8601(s)?;
    u64::try_from(secs).ok().map(unix_to_iso8601)
}

/// Absolute gap in whole-or-fractional days between two ISO-8601 timestamps.
/// `None` if either side fails to parse.
pub fn days_between(a: &str, b: &str) -> Option<f64> {
    let a = parse_iso8601(a)?;
    let b = parse_iso8601(b)?;
    Some((a - b).abs() as f64 / SECS_PER_DAY as f64)
}

/// Howard Hinnant's civil_from_days: Unix epoch days → (year, month, day).
fn civil_from_days(days: i64) -> (i64, u64, u64) {
    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

/// Inverse of `civil_from_days`: (year, month, day) → Unix epoch days.
fn days_from_civil(y: i64, m: u64, d: u64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as u64;
    let mp = if m > 2 { m - 3 } else { m + 9 };
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe as i64 - 719468
}
