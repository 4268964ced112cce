use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::models::TripRecord;
use crate::enforcement::EnforcementSelection;

use super::{ActiveSnapshot, RecoveryFlag, TripStore};

#[derive(Default)]
struct MemoryInner {
    active: Option<ActiveSnapshot>,
    completed: Vec<TripRecord>,
    flags: HashMap<RecoveryFlag, (bool, DateTime<Utc>)>,
    selection: Option<EnforcementSelection>,
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every stored row, active snapshot included.
    pub fn all_records(&self) -> Vec<TripRecord> {
        let guard = self.lock();
        guard
            .active
            .clone()
            .map(ActiveSnapshot::into_record)
            .into_iter()
            .chain(guard.completed.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl TripStore for MemoryStore {
    async fn save_active_snapshot(&self, snapshot: &ActiveSnapshot) -> Result<()> {
        self.lock().active = Some(snapshot.clone());
        Ok(())
    }

    async fn load_active_snapshot(&self) -> Result<Option<ActiveSnapshot>> {
        Ok(self.lock().active.clone())
    }

    async fn save_completed_trip(&self, record: &TripRecord) -> Result<()> {
        let mut guard = self.lock();
        guard.active = None;
        guard.completed.retain(|existing| existing.id != record.id);
        guard.completed.push(record.clone());
        Ok(())
    }

    async fn delete_active_snapshot(&self) -> Result<()> {
        self.lock().active = None;
        Ok(())
    }

    async fn list_recent_trips(&self, limit: usize) -> Result<Vec<TripRecord>> {
        let mut trips = self.lock().completed.clone();
        trips.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        trips.truncate(limit);
        Ok(trips)
    }

    async fn trips_since(&self, since: DateTime<Utc>) -> Result<Vec<TripRecord>> {
        let mut trips: Vec<TripRecord> = self
            .lock()
            .completed
            .iter()
            .filter(|trip| trip.start_time >= since)
            .cloned()
            .collect();
        trips.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(trips)
    }

    async fn set_flag(&self, flag: RecoveryFlag, value: bool) -> Result<()> {
        self.lock().flags.insert(flag, (value, Utc::now()));
        Ok(())
    }

    async fn flag(&self, flag: RecoveryFlag) -> Result<bool> {
        Ok(self
            .lock()
            .flags
            .get(&flag)
            .map(|(value, _)| *value)
            .unwrap_or(false))
    }

    async fn flag_set_at(&self, flag: RecoveryFlag) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .lock()
            .flags
            .get(&flag)
            .and_then(|(value, at)| value.then_some(*at)))
    }

    async fn save_selection(&self, selection: &EnforcementSelection) -> Result<()> {
        self.lock().selection = Some(selection.clone());
        Ok(())
    }

    async fn load_selection(&self) -> Result<Option<EnforcementSelection>> {
        Ok(self.lock().selection.clone())
    }
}
