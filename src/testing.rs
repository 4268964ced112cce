//! Test doubles shared by unit and scenario tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::models::TripRecord;
use crate::enforcement::{EnforcementSelection, Enforcer};
use crate::lifecycle::{BackgroundExecution, BackgroundTaskId};
use crate::store::{ActiveSnapshot, RecoveryFlag, TripStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnforcerCall {
    /// Carries the selection size.
    Apply(usize),
    Reset,
}

#[derive(Default)]
pub struct RecordingEnforcer {
    calls: Mutex<Vec<EnforcerCall>>,
}

impl RecordingEnforcer {
    pub fn calls(&self) -> Vec<EnforcerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn apply_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, EnforcerCall::Apply(_)))
            .count()
    }

    pub fn reset_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, EnforcerCall::Reset))
            .count()
    }
}

impl Enforcer for RecordingEnforcer {
    fn apply(&self, selection: &EnforcementSelection) {
        self.calls
            .lock()
            .unwrap()
            .push(EnforcerCall::Apply(selection.len()));
    }

    fn reset(&self) {
        self.calls.lock().unwrap().push(EnforcerCall::Reset);
    }
}

pub struct RecordingBackground {
    grant: AtomicBool,
    next_id: AtomicU64,
    begun: Mutex<Vec<BackgroundTaskId>>,
    ended: Mutex<Vec<BackgroundTaskId>>,
}

impl Default for RecordingBackground {
    fn default() -> Self {
        Self {
            grant: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            begun: Mutex::new(Vec::new()),
            ended: Mutex::new(Vec::new()),
        }
    }
}

impl RecordingBackground {
    pub fn refusing() -> Self {
        let background = Self::default();
        background.grant.store(false, Ordering::SeqCst);
        background
    }

    pub fn begun(&self) -> Vec<BackgroundTaskId> {
        self.begun.lock().unwrap().clone()
    }

    pub fn ended(&self) -> Vec<BackgroundTaskId> {
        self.ended.lock().unwrap().clone()
    }
}

impl BackgroundExecution for RecordingBackground {
    fn begin(&self) -> Option<BackgroundTaskId> {
        if !self.grant.load(Ordering::SeqCst) {
            return None;
        }
        let id = BackgroundTaskId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.begun.lock().unwrap().push(id);
        Some(id)
    }

    fn end(&self, id: BackgroundTaskId) {
        self.ended.lock().unwrap().push(id);
    }
}

/// Store whose every operation fails.
#[derive(Default)]
pub struct FailingStore;

#[async_trait]
impl TripStore for FailingStore {
    async fn save_active_snapshot(&self, _snapshot: &ActiveSnapshot) -> Result<()> {
        bail!("disk full")
    }

    async fn load_active_snapshot(&self) -> Result<Option<ActiveSnapshot>> {
        bail!("disk full")
    }

    async fn save_completed_trip(&self, _record: &TripRecord) -> Result<()> {
        bail!("disk full")
    }

    async fn delete_active_snapshot(&self) -> Result<()> {
        bail!("disk full")
    }

    async fn list_recent_trips(&self, _limit: usize) -> Result<Vec<TripRecord>> {
        bail!("disk full")
    }

    async fn trips_since(&self, _since: DateTime<Utc>) -> Result<Vec<TripRecord>> {
        bail!("disk full")
    }

    async fn set_flag(&self, _flag: RecoveryFlag, _value: bool) -> Result<()> {
        bail!("disk full")
    }

    async fn flag(&self, _flag: RecoveryFlag) -> Result<bool> {
        bail!("disk full")
    }

    async fn flag_set_at(&self, _flag: RecoveryFlag) -> Result<Option<DateTime<Utc>>> {
        bail!("disk full")
    }

    async fn save_selection(&self, _selection: &EnforcementSelection) -> Result<()> {
        bail!("disk full")
    }

    async fn load_selection(&self) -> Result<Option<EnforcementSelection>> {
        bail!("disk full")
    }
}

/// Advances paused time and lets spawned tasks run.
pub async fn advance(secs: f64) {
    tokio::time::sleep(std::time::Duration::from_secs_f64(secs)).await;
    settle().await;
}

pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
