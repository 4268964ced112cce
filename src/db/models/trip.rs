use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::trip::{Coordinate, TripState};

/// One trip row. Active rows carry `trip_state` and `speed_history`;
/// finished rows carry neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripRecord {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    pub distance_m: f64,
    pub average_speed_mph: f64,
    pub max_speed_mph: f64,
    pub start_location: Option<Coordinate>,
    pub end_location: Option<Coordinate>,
    pub route: Vec<Coordinate>,
    pub apps_blocked: u32,
    pub safety_score: u8,
    /// Reserved for attempt tracking; always zero for now.
    pub distractions: u32,
    pub is_active_trip: bool,
    pub trip_state: Option<TripState>,
    pub speed_history: Option<Vec<f64>>,
}
