//! Persistence boundary for the trip core.
//!
//! The controller and lifecycle monitor only see [`TripStore`]; the SQLite
//! [`Database`](crate::db::Database) is the production implementation and
//! [`MemoryStore`] backs hosts without durable storage and the tests.

mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::TripRecord;
use crate::enforcement::EnforcementSelection;
use crate::trip::{Coordinate, TripState};

pub use memory::MemoryStore;

/// In-progress trip as persisted on every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSnapshot {
    pub trip_id: String,
    pub state: TripState,
    pub start_time: DateTime<Utc>,
    pub start_location: Option<Coordinate>,
    pub distance_m: f64,
    pub route: Vec<Coordinate>,
    pub speed_history: Vec<f64>,
    pub apps_blocked: u32,
}

impl ActiveSnapshot {
    pub fn into_record(self) -> TripRecord {
        TripRecord {
            id: self.trip_id,
            start_time: self.start_time,
            end_time: None,
            duration_secs: 0.0,
            distance_m: self.distance_m,
            average_speed_mph: 0.0,
            max_speed_mph: self.speed_history.iter().copied().fold(0.0, f64::max),
            start_location: self.start_location,
            end_location: None,
            route: self.route,
            apps_blocked: self.apps_blocked,
            safety_score: 0,
            distractions: 0,
            is_active_trip: true,
            trip_state: Some(self.state),
            speed_history: Some(self.speed_history),
        }
    }

    /// `None` for finished records.
    pub fn from_record(record: TripRecord) -> Option<Self> {
        if !record.is_active_trip {
            return None;
        }

        Some(Self {
            trip_id: record.id,
            state: record.trip_state?,
            start_time: record.start_time,
            start_location: record.start_location,
            distance_m: record.distance_m,
            route: record.route,
            speed_history: record.speed_history.unwrap_or_default(),
            apps_blocked: record.apps_blocked,
        })
    }
}

/// Durable markers that must survive process death.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryFlag {
    /// Shielding was applied by the force-quit fail-safe rather than by a trip start.
    AppsBlockedDueToForceQuit,
    /// The process was terminated (or lost its background grant) mid-session.
    WasForceQuit,
}

impl RecoveryFlag {
    pub fn key(&self) -> &'static str {
        match self {
            RecoveryFlag::AppsBlockedDueToForceQuit => "appsBlockedDueToForceQuit",
            RecoveryFlag::WasForceQuit => "wasForceQuit",
        }
    }
}

#[async_trait]
pub trait TripStore: Send + Sync {
    /// Upserts the single active snapshot, replacing any other active row.
    async fn save_active_snapshot(&self, snapshot: &ActiveSnapshot) -> Result<()>;

    async fn load_active_snapshot(&self) -> Result<Option<ActiveSnapshot>>;

    /// Removes the active snapshot and inserts the finished record atomically.
    async fn save_completed_trip(&self, record: &TripRecord) -> Result<()>;

    async fn delete_active_snapshot(&self) -> Result<()>;

    /// Finished trips, newest first.
    async fn list_recent_trips(&self, limit: usize) -> Result<Vec<TripRecord>>;

    /// Finished trips that started at or after `since`, newest first.
    async fn trips_since(&self, since: DateTime<Utc>) -> Result<Vec<TripRecord>>;

    async fn set_flag(&self, flag: RecoveryFlag, value: bool) -> Result<()>;

    async fn flag(&self, flag: RecoveryFlag) -> Result<bool>;

    /// When the flag was last raised, if it is currently set.
    async fn flag_set_at(&self, flag: RecoveryFlag) -> Result<Option<DateTime<Utc>>>;

    /// Read-once: returns the flag and clears it.
    async fn take_flag(&self, flag: RecoveryFlag) -> Result<bool> {
        let value = self.flag(flag).await?;
        if value {
            self.set_flag(flag, false).await?;
        }
        Ok(value)
    }

    async fn save_selection(&self, selection: &EnforcementSelection) -> Result<()>;

    async fn load_selection(&self) -> Result<Option<EnforcementSelection>>;
}
