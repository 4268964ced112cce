use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripSummary {
    pub since: DateTime<Utc>,
    pub total_trips: u32,
    pub total_duration_secs: f64,
    /// Human form of `total_duration_secs`, e.g. `"4h 32m"`.
    pub total_time: String,
    pub total_distance_m: f64,
    pub average_score: u8,
    pub apps_blocked: u32,
}
