//! SQLite helpers shared by the central and per-delivery stores
//!
//! Timestamps are stored as fixed-width RFC 3339 text in UTC so that
//! lexicographic comparison in SQL matches chronological order.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;

/// Format a timestamp for storage
pub fn to_sql_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp, reporting the column on failure
pub fn from_sql_time(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

/// Parse a nullable stored timestamp
pub fn from_sql_time_opt(column: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| from_sql_time(column, &s)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fixed_width_ordering() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let late = early + chrono::Duration::milliseconds(1500);

        let a = to_sql_time(early);
        let b = to_sql_time(late);

        assert_eq!(a, "2024-01-01T09:00:00.000Z");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn test_parse_round_trip() {
        let at = Utc.with_ymd_and_hms(2024, 6, 30, 23, 59, 59).unwrap();
        assert_eq!(from_sql_time(0, &to_sql_time(at)).unwrap(), at);
        assert!(from_sql_time(0, "yesterday").is_err());
        assert_eq!(from_sql_time_opt(0, None).unwrap(), None);
    }
}
