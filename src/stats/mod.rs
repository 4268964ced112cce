mod types;

pub use types::TripSummary;

use chrono::{DateTime, Duration, Utc};

use crate::db::models::TripRecord;

pub const WEEK_DAYS: i64 = 7;

/// Totals over finished trips that started at or after `since`.
pub fn summarize(trips: &[TripRecord], since: DateTime<Utc>) -> TripSummary {
    let included: Vec<&TripRecord> = trips
        .iter()
        .filter(|trip| !trip.is_active_trip && trip.start_time >= since)
        .collect();

    let total_duration_secs: f64 = included.iter().map(|trip| trip.duration_secs).sum();
    let average_score = if included.is_empty() {
        0
    } else {
        let total: f64 = included.iter().map(|trip| f64::from(trip.safety_score)).sum();
        (total / included.len() as f64).round() as u8
    };

    TripSummary {
        since,
        total_trips: u32::try_from(included.len()).unwrap_or(u32::MAX),
        total_duration_secs,
        total_time: format_duration(total_duration_secs),
        total_distance_m: included.iter().map(|trip| trip.distance_m).sum(),
        average_score,
        apps_blocked: included
            .iter()
            .fold(0u32, |acc, trip| acc.saturating_add(trip.apps_blocked)),
    }
}

pub fn weekly_summary(trips: &[TripRecord], now: DateTime<Utc>) -> TripSummary {
    summarize(trips, now - Duration::days(WEEK_DAYS))
}

/// `"4h 32m"`, or just minutes under an hour.
pub fn format_duration(total_secs: f64) -> String {
    let minutes = if total_secs.is_finite() && total_secs > 0.0 {
        (total_secs / 60.0).floor() as u64
    } else {
        0
    };
    let (hours, minutes) = (minutes / 60, minutes % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trip(start: DateTime<Utc>, minutes: f64, score: u8, apps: u32) -> TripRecord {
        TripRecord {
            id: uuid::Uuid::new_v4().to_string(),
            start_time: start,
            end_time: Some(start + Duration::seconds((minutes * 60.0) as i64)),
            duration_secs: minutes * 60.0,
            distance_m: 10_000.0,
            average_speed_mph: 25.0,
            max_speed_mph: 40.0,
            start_location: None,
            end_location: None,
            route: Vec::new(),
            apps_blocked: apps,
            safety_score: score,
            distractions: 0,
            is_active_trip: false,
            trip_state: None,
            speed_history: None,
        }
    }

    #[test]
    fn formats_hours_and_minutes() {
        assert_eq!(format_duration(0.0), "0m");
        assert_eq!(format_duration(59.0), "0m");
        assert_eq!(format_duration(32.0 * 60.0), "32m");
        assert_eq!(format_duration((4.0 * 60.0 + 32.0) * 60.0 + 10.0), "4h 32m");
        assert_eq!(format_duration(f64::NAN), "0m");
    }

    #[test]
    fn weekly_summary_only_counts_the_last_seven_days() {
        let now = Utc::now();
        let trips = vec![
            trip(now - Duration::days(1), 90.0, 100, 3),
            trip(now - Duration::days(3), 45.0, 80, 3),
            trip(now - Duration::days(10), 600.0, 10, 9),
        ];

        let summary = weekly_summary(&trips, now);
        assert_eq!(summary.total_trips, 2);
        assert_eq!(summary.total_time, "2h 15m");
        assert_eq!(summary.average_score, 90);
        assert_eq!(summary.apps_blocked, 6);
        assert_eq!(summary.total_distance_m, 20_000.0);
    }

    #[test]
    fn active_rows_are_ignored_and_empty_average_is_zero() {
        let now = Utc::now();
        let mut active = trip(now, 5.0, 100, 1);
        active.is_active_trip = true;

        let summary = summarize(&[active], now - Duration::days(1));
        assert_eq!(summary.total_trips, 0);
        assert_eq!(summary.average_score, 0);
        assert_eq!(summary.total_time, "0m");
    }
}
