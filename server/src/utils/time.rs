//! Time utility functions

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};

/// Parse a client timestamp.
///
/// Accepts RFC 3339 with an offset (`2024-01-01T10:00:00.123Z`,
/// `2024-01-01T12:00:00+02:00`). Naive ISO 8601 values without an offset
/// (as produced by `datetime.utcnow().isoformat()`) are read as UTC.
/// Sub-microsecond digits are dropped, matching what storage keeps.
pub fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    if ts.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(truncate_to_micros(dt.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| truncate_to_micros(naive.and_utc()))
}

/// Drop sub-microsecond precision
pub fn truncate_to_micros(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.trunc_subsecs(6)
}

/// Convert microseconds since Unix epoch to DateTime<Utc>
pub fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_else(|| {
        tracing::warn!(micros, "Invalid timestamp, using epoch");
        DateTime::UNIX_EPOCH
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_parse_timestamp_rfc3339() {
        let dt = parse_timestamp("2024-01-01T10:00:00.450Z").unwrap();
        assert_eq!(dt.timestamp_subsec_millis(), 450);
    }

    #[test]
    fn test_parse_timestamp_offset_normalized() {
        let dt = parse_timestamp("2024-01-01T12:00:00+02:00").unwrap();
        assert_eq!(dt.hour(), 10);
    }

    #[test]
    fn test_parse_timestamp_naive_is_utc() {
        let dt = parse_timestamp("2024-01-01T10:00:00.123456").unwrap();
        assert_eq!(dt.hour(), 10);
        assert_eq!(dt.timestamp_subsec_micros(), 123_456);
        assert!(parse_timestamp("2024-01-01 10:00:00").is_some());
    }

    #[test]
    fn test_parse_timestamp_invalid() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("2024-13-01T00:00:00Z").is_none());
    }

    #[test]
    fn test_parse_timestamp_drops_nanoseconds() {
        let dt = parse_timestamp("2024-01-01T10:00:00.000000900Z").unwrap();
        assert_eq!(dt.timestamp_subsec_nanos(), 0);
        let dt = parse_timestamp("2024-01-01T10:00:00.001000100").unwrap();
        assert_eq!(dt.timestamp_subsec_nanos(), 1_000_000);
        assert_eq!(micros_to_datetime(dt.timestamp_micros()), dt);
    }

    #[test]
    fn test_micros_roundtrip() {
        let dt = parse_timestamp("2024-01-01T10:00:00.000123Z").unwrap();
        assert_eq!(micros_to_datetime(dt.timestamp_micros()), dt);
    }
}
