//! Timestamp parsing and formatting.
//!
//! All persisted timestamps are ISO-8601 in UTC. Remote timestamps
//! may carry a trailing `Z` or an explicit offset; both parse to the
//! same instant.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{Result, SyncError};

/// Parse an ISO-8601 timestamp, tolerating a trailing `Z`, an
/// explicit offset, or a naive datetime (assumed UTC).
///
/// # Errors
///
/// Returns a validation-style `Config` error naming the field when
/// the value is not a recognizable timestamp.
pub fn parse_timestamp(value: &str, field: &str) -> Result<DateTime<Utc>> {
    let s = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // Python's isoformat() omits the offset for naive datetimes.
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }

    Err(SyncError::Config(format!(
        "invalid timestamp for {field}: '{s}'"
    )))
}

/// Compact `YYYYmmddHHMMSS` stamp used in snapshot directory names
/// and conflict ids.
#[must_use]
pub fn compact_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

/// `YYYYmmdd_HHMMSS` stamp used in per-write backup file names.
#[must_use]
pub fn backup_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_parse_with_z_suffix() {
        let dt = parse_timestamp("2025-11-06T14:00:00Z", "test").unwrap();
        assert_eq!(dt.year(), 2025);
    }

    #[test]
    fn test_parse_with_offset() {
        let a = parse_timestamp("2025-11-06T14:00:00Z", "test").unwrap();
        let b = parse_timestamp("2025-11-06T15:00:00+01:00", "test").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_naive_assumed_utc() {
        let dt = parse_timestamp("2025-11-06T14:00:00.123456", "test").unwrap();
        assert_eq!(dt.year(), 2025);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_timestamp("yesterday", "test").is_err());
    }

    #[test]
    fn test_compact_format() {
        let dt = parse_timestamp("2025-01-02T03:04:05Z", "test").unwrap();
        assert_eq!(compact_timestamp(dt), "20250102030405");
        assert_eq!(backup_timestamp(dt), "20250102_030405");
    }
}
