//! Row-conversion helpers shared by the SQLite repositories.
//!
//! SQLite stores UUIDs, timestamps, and dates as TEXT; these helpers
//! centralize the parsing and error mapping.

use super::DbError;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(s).map_err(|e| DbError::Serialization(format!("Invalid UUID: {}", e)))
}

pub(crate) fn parse_opt_uuid(s: Option<&str>) -> Result<Option<Uuid>, DbError> {
    s.map(parse_uuid).transpose()
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Serialization(format!("Invalid timestamp: {}", e)))
}

pub(crate) fn parse_opt_ts(s: Option<&str>) -> Result<Option<DateTime<Utc>>, DbError> {
    s.map(parse_ts).transpose()
}

pub(crate) fn parse_opt_date(s: Option<&str>) -> Result<Option<NaiveDate>, DbError> {
    s.map(|v| {
        NaiveDate::parse_from_str(v, "%Y-%m-%d")
            .map_err(|e| DbError::Serialization(format!("Invalid date: {}", e)))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(parse_uuid(&id.to_string()).unwrap(), id);
        assert!(parse_uuid("not-a-uuid").is_err());
    }

    #[test]
    fn test_parse_ts() {
        let now = Utc::now();
        let parsed = parse_ts(&now.to_rfc3339()).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
        assert!(parse_ts("yesterday").is_err());
    }

    #[test]
    fn test_parse_opt_date() {
        assert_eq!(parse_opt_date(None).unwrap(), None);
        assert_eq!(
            parse_opt_date(Some("2024-03-01")).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert!(parse_opt_date(Some("03/01/2024")).is_err());
    }
}
