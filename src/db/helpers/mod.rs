use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::trip::Coordinate;

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} out of range: {value}"))
}

pub fn to_u8(value: i64, field: &str) -> Result<u8> {
    u8::try_from(value).map_err(|_| anyhow!("{field} out of range: {value}"))
}

/// Fixed-width RFC 3339 so stored timestamps sort lexically.
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn coordinate_from_columns(
    latitude: Option<f64>,
    longitude: Option<f64>,
) -> Option<Coordinate> {
    match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Some(Coordinate::new(latitude, longitude)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formatted_datetimes_round_trip_and_sort() {
        let early = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let late = early + chrono::Duration::milliseconds(1500);

        let (a, b) = (format_datetime(&early), format_datetime(&late));
        assert!(a < b);
        assert_eq!(parse_datetime(&b, "t").unwrap(), late);
    }

    #[test]
    fn half_a_coordinate_is_none() {
        assert_eq!(coordinate_from_columns(Some(1.0), None), None);
        assert_eq!(
            coordinate_from_columns(Some(1.0), Some(2.0)),
            Some(Coordinate::new(1.0, 2.0))
        );
    }
}
