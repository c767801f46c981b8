//! Record timestamp formatting.
//!
//! Timestamps are UTC and rendered as ISO-8601 without a zone suffix
//! (`2024-05-01T12:30:00.123456`). Precision is capped at microseconds so a
//! formatted timestamp parses back to the identical value.

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

const FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]");

const FORMAT_NO_FRACTION: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

/// Current UTC time truncated to microseconds.
pub fn now() -> OffsetDateTime {
    truncate_to_micros(OffsetDateTime::now_utc())
}

/// Drop sub-microsecond precision.
pub fn truncate_to_micros(ts: OffsetDateTime) -> OffsetDateTime {
    ts.replace_nanosecond(ts.nanosecond() / 1_000 * 1_000)
        .unwrap_or(ts)
}

/// Format a timestamp as naive ISO-8601 in UTC.
pub fn format(ts: OffsetDateTime) -> String {
    let utc = ts.to_offset(time::UtcOffset::UTC);
    // Formatting a well-formed description into a String cannot fail.
    utc.format(FORMAT).unwrap_or_default()
}

/// Parse a naive ISO-8601 timestamp, interpreting it as UTC.
///
/// Accepts values with or without a fractional part.
pub fn parse(s: &str) -> Result<OffsetDateTime, time::error::Parse> {
    let naive = PrimitiveDateTime::parse(s, FORMAT)
        .or_else(|_| PrimitiveDateTime::parse(s, FORMAT_NO_FRACTION))?;
    Ok(naive.assume_utc())
}

/// Serde adapter for the naive ISO-8601 representation.
#[cfg(feature = "serde")]
pub mod naive_iso {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;

    pub fn serialize<S: Serializer>(ts: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format(*ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OffsetDateTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse(&s).map_err(serde::de::Error::custom)
    }
}
