mod flags;
mod selection;
mod trips;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::{connection::Database, models::TripRecord};
use crate::enforcement::EnforcementSelection;
use crate::store::{ActiveSnapshot, RecoveryFlag, TripStore};

#[async_trait]
impl TripStore for Database {
    async fn save_active_snapshot(&self, snapshot: &ActiveSnapshot) -> Result<()> {
        self.upsert_active_trip(snapshot.clone().into_record()).await
    }

    async fn load_active_snapshot(&self) -> Result<Option<ActiveSnapshot>> {
        Ok(self
            .get_active_trip()
            .await?
            .and_then(ActiveSnapshot::from_record))
    }

    async fn save_completed_trip(&self, record: &TripRecord) -> Result<()> {
        let mut record = record.clone();
        record.is_active_trip = false;
        record.trip_state = None;
        record.speed_history = None;
        self.complete_trip(record).await
    }

    async fn delete_active_snapshot(&self) -> Result<()> {
        self.delete_active_trip().await
    }

    async fn list_recent_trips(&self, limit: usize) -> Result<Vec<TripRecord>> {
        self.list_trips_paginated(limit, 0).await
    }

    async fn trips_since(&self, since: DateTime<Utc>) -> Result<Vec<TripRecord>> {
        self.list_trips_since(since).await
    }

    async fn set_flag(&self, flag: RecoveryFlag, value: bool) -> Result<()> {
        self.set_recovery_flag(flag, value).await
    }

    async fn flag(&self, flag: RecoveryFlag) -> Result<bool> {
        Ok(self
            .get_recovery_flag(flag)
            .await?
            .map(|(value, _)| value)
            .unwrap_or(false))
    }

    async fn flag_set_at(&self, flag: RecoveryFlag) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .get_recovery_flag(flag)
            .await?
            .and_then(|(value, at)| value.then_some(at)))
    }

    async fn save_selection(&self, selection: &EnforcementSelection) -> Result<()> {
        self.upsert_selection(selection).await
    }

    async fn load_selection(&self) -> Result<Option<EnforcementSelection>> {
        self.get_selection().await
    }
}
