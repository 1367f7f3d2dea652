//! Timestamp formatting used for record timestamps, ids and file names.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

/// Fallback timestamp when formatting fails
const FALLBACK_TIMESTAMP: &str = "1970-01-01T00:00:00Z";

#[must_use]
pub fn iso8601(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339)
        .unwrap_or_else(|_| FALLBACK_TIMESTAMP.to_string())
}

#[must_use]
pub fn iso8601_now() -> String {
    iso8601(OffsetDateTime::now_utc())
}

/// `YYYYMMDDhhmmssffffff`, used as the suffix of interaction ids.
#[must_use]
pub fn compact_micros(ts: OffsetDateTime) -> String {
    ts.format(format_description!(
        "[year][month][day][hour][minute][second][subsecond digits:6]"
    ))
    .unwrap_or_else(|_| ts.unix_timestamp_nanos().to_string())
}

/// `YYYYMMDD_hhmmss_ffffff`, used for result file names. Sorts chronologically.
#[must_use]
pub fn file_stamp(ts: OffsetDateTime) -> String {
    ts.format(format_description!(
        "[year][month][day]_[hour][minute][second]_[subsecond digits:6]"
    ))
    .unwrap_or_else(|_| ts.unix_timestamp_nanos().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn formats_are_stable() {
        let ts = datetime!(2026-02-07 15:04:05.123456 UTC);
        assert_eq!(compact_micros(ts), "20260207150405123456");
        assert_eq!(file_stamp(ts), "20260207_150405_123456");
        assert!(iso8601(ts).starts_with("2026-02-07T15:04:05.123456"));
    }
}
