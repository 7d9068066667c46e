//! Timestamp parsing for track logs
//!
//! Track logs store ISO-8601 timestamps either in UTC (`...Z`) or with an
//! explicit `±HH:MM` offset. Everything is converted to UTC here.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

/// Layouts accepted after the offset has been stripped
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse an ISO-8601 timestamp into UTC.
///
/// A trailing `[+-]HH:MM` offset is removed and subtracted from the local
/// time. Offset digits that are not numbers count as zero. Returns `None` for
/// empty or unparseable input.
pub fn parse_time(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let (local, offset_seconds) = split_offset(input);
    let local = local.strip_suffix(['Z', 'z']).unwrap_or(local);

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(local, format).ok())?;

    naive
        .and_utc()
        .checked_sub_signed(Duration::seconds(offset_seconds))
}

/// Split a trailing `[+-]HH:MM` suffix off, returning the remainder and the
/// signed offset in seconds
fn split_offset(input: &str) -> (&str, i64) {
    let bytes = input.as_bytes();
    if bytes.len() < 6 {
        return (input, 0);
    }

    let start = bytes.len() - 6;
    let sign = match bytes[start] {
        b'+' => 1,
        b'-' => -1,
        _ => return (input, 0),
    };
    if bytes[start + 3] != b':' || !input.is_char_boundary(start) {
        return (input, 0);
    }

    let hours = parse_two_digits(&bytes[start + 1..start + 3]);
    let minutes = parse_two_digits(&bytes[start + 4..start + 6]);
    let offset = match (hours, minutes) {
        (Some(h), Some(m)) => sign * (h * 3600 + m * 60),
        _ => 0,
    };

    (&input[..start], offset)
}

fn parse_two_digits(digits: &[u8]) -> Option<i64> {
    digits.iter().try_fold(0i64, |acc, b| {
        b.is_ascii_digit().then(|| acc * 10 + i64::from(b - b'0'))
    })
}
