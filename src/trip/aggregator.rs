use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::TripRecord;
use crate::sensing::{SpeedHistory, MPS_TO_MPH};
use crate::store::ActiveSnapshot;

use super::scoring::score_history;
use super::TripState;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance in metres.
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.latitude.to_radians().cos()
                * other.latitude.to_radians().cos()
                * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
        EARTH_RADIUS_M * c
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Accumulators for the trip in progress.
#[derive(Debug, Clone, Default)]
pub struct TripAggregator {
    trip_id: Option<String>,
    start_time: Option<DateTime<Utc>>,
    start_location: Option<Coordinate>,
    route: Vec<Coordinate>,
    distance_m: f64,
}

impl TripAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(
        &mut self,
        trip_id: String,
        start_time: DateTime<Utc>,
        start_location: Option<Coordinate>,
    ) {
        *self = Self {
            trip_id: Some(trip_id),
            start_time: Some(start_time),
            start_location,
            route: start_location.into_iter().collect(),
            distance_m: 0.0,
        };
    }

    /// Appends a fix to the route and adds the hop from the previous fix.
    /// Returns the distance added.
    pub fn add_fix(&mut self, coordinate: Coordinate) -> f64 {
        if !coordinate.is_valid() {
            return 0.0;
        }

        let delta = self
            .route
            .last()
            .map(|last| last.distance_to(&coordinate))
            .unwrap_or(0.0);
        self.add_distance(delta);
        self.route.push(coordinate);
        delta
    }

    pub fn add_distance(&mut self, delta_m: f64) {
        if delta_m.is_finite() && delta_m > 0.0 {
            self.distance_m += delta_m;
        }
    }

    pub fn distance_m(&self) -> f64 {
        self.distance_m
    }

    pub fn route(&self) -> &[Coordinate] {
        &self.route
    }

    pub fn trip_id(&self) -> Option<&str> {
        self.trip_id.as_deref()
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn snapshot(
        &self,
        state: TripState,
        history: &SpeedHistory,
        apps_blocked: u32,
    ) -> Option<ActiveSnapshot> {
        Some(ActiveSnapshot {
            trip_id: self.trip_id.clone()?,
            state,
            start_time: self.start_time?,
            start_location: self.start_location,
            distance_m: self.distance_m,
            route: self.route.clone(),
            speed_history: history.to_vec(),
            apps_blocked,
        })
    }

    pub fn restore(&mut self, snapshot: &ActiveSnapshot) {
        *self = Self {
            trip_id: Some(snapshot.trip_id.clone()),
            start_time: Some(snapshot.start_time),
            start_location: snapshot.start_location,
            route: snapshot.route.clone(),
            distance_m: snapshot.distance_m,
        };
    }

    /// Builds the finished record. `None` when the trip was never properly
    /// started (no start time or start location).
    pub fn finalize(
        &self,
        end_time: DateTime<Utc>,
        end_location: Option<Coordinate>,
        history: &SpeedHistory,
        apps_blocked: u32,
    ) -> Option<TripRecord> {
        let trip_id = self.trip_id.clone()?;
        let start_time = self.start_time?;
        let start_location = self.start_location?;
        let end_location = end_location
            .or_else(|| self.route.last().copied())
            .unwrap_or(start_location);

        let duration_secs = ((end_time - start_time).num_milliseconds().max(0) as f64) / 1000.0;
        let average_speed_mph = if duration_secs > 0.0 {
            self.distance_m / duration_secs * MPS_TO_MPH
        } else {
            0.0
        };

        Some(TripRecord {
            id: trip_id,
            start_time,
            end_time: Some(end_time),
            duration_secs,
            distance_m: self.distance_m,
            average_speed_mph,
            max_speed_mph: history.max(),
            start_location: Some(start_location),
            end_location: Some(end_location),
            route: self.route.clone(),
            apps_blocked,
            safety_score: score_history(history),
            distractions: 0,
            is_active_trip: false,
            trip_state: None,
            speed_history: None,
        })
    }
}
