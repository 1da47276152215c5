//! Timestamp utilities

use chrono::{DateTime, LocalResult, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert epoch milliseconds to a UTC timestamp
///
/// Returns `None` for values outside chrono's representable range.
pub fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}

/// Convert a UTC timestamp to epoch milliseconds
pub fn to_epoch_millis(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_millis()
}

/// Convert whole hours to a chrono duration
pub fn hours(hours: u64) -> chrono::Duration {
    chrono::Duration::hours(hours.min(i64::MAX as u64 / 3_600_000) as i64)
}

/// Parse a local wall-clock timestamp in `format` and time zone `zone`
///
/// Daylight-saving transitions follow the zone's rules:
/// - a repeated hour (autumn) resolves to its first occurrence
/// - a skipped hour (spring) is read with the offset in force before the jump
///
/// Returns `None` when the string does not match `format`.
pub fn parse_local(raw: &str, format: &str, zone: Tz) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), format).ok()?;
    match zone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => {
            let before = zone
                .from_local_datetime(&(naive - chrono::Duration::hours(1)))
                .earliest()?;
            let offset = chrono::Duration::seconds(i64::from(before.offset().fix().local_minus_utc()));
            Some(DateTime::<Utc>::from_naive_utc_and_offset(naive - offset, Utc))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_returns_recent_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01 00:00:00 UTC
        assert!(timestamp.timestamp() < 4_102_444_800); // 2100-01-01 00:00:00 UTC
    }

    #[test]
    fn test_epoch_millis_conversion_is_exact() {
        let millis = 1_625_000_000_123i64;
        let ts = from_epoch_millis(millis).unwrap();
        assert_eq!(to_epoch_millis(ts), millis);
    }

    #[test]
    fn test_hours_to_duration() {
        assert_eq!(hours(72), chrono::Duration::days(3));
        assert_eq!(hours(0), chrono::Duration::zero());
    }

    const FORMAT: &str = "%Y.%m.%d %H:%M";

    #[test]
    fn test_parse_local_summer_time() {
        let ts = parse_local("2025.05.26 15:51", FORMAT, chrono_tz::Europe::Vilnius).unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-05-26T12:51:00+00:00");
    }

    #[test]
    fn test_parse_local_winter_time() {
        let ts = parse_local("2025.01.15 15:00", FORMAT, chrono_tz::Europe::Vilnius).unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-01-15T13:00:00+00:00");
    }

    #[test]
    fn test_parse_local_repeated_hour_takes_first_occurrence() {
        // Clocks go back from 04:00 to 03:00 on 2025-10-26
        let ts = parse_local("2025.10.26 03:30", FORMAT, chrono_tz::Europe::Vilnius).unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-10-26T00:30:00+00:00");
    }

    #[test]
    fn test_parse_local_skipped_hour_uses_previous_offset() {
        // Clocks jump from 03:00 to 04:00 on 2025-03-30
        let ts = parse_local("2025.03.30 03:30", FORMAT, chrono_tz::Europe::Vilnius).unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-03-30T01:30:00+00:00");
    }

    #[test]
    fn test_parse_local_rejects_garbage() {
        assert!(parse_local("invalid date", FORMAT, chrono_tz::Europe::Vilnius).is_none());
        assert!(parse_local("", FORMAT, chrono_tz::UTC).is_none());
    }
}
