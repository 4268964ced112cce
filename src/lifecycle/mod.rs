//! Force-quit recovery.
//!
//! The host forwards process lifecycle notifications as [`LifecycleEvent`]s.
//! While backgrounded during a trip the [`LifecycleMonitor`] raises the shield
//! early, on the assumption that the process may be killed before the trip
//! controller gets another chance.

mod monitor;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::trip::TripState;

pub use monitor::LifecycleMonitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    EnteredBackground,
    WillEnterForeground,
    WillTerminate,
    /// The OS revoked the background execution grant before foreground.
    BackgroundGrantExpired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackgroundTaskId(pub u64);

/// Limited-duration background execution offered by the host platform.
/// Grant expiry is delivered as [`LifecycleEvent::BackgroundGrantExpired`].
pub trait BackgroundExecution: Send + Sync {
    /// `None` when the platform refuses the grant.
    fn begin(&self) -> Option<BackgroundTaskId>;
    fn end(&self, id: BackgroundTaskId);
}

/// Hosts without background execution grants.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBackgroundExecution;

impl BackgroundExecution for NoBackgroundExecution {
    fn begin(&self) -> Option<BackgroundTaskId> {
        None
    }

    fn end(&self, _id: BackgroundTaskId) {}
}

/// Fail-safe rule for a background check: only an active trip that has been
/// in the background for longer than `threshold` qualifies.
pub fn should_enforce(state: TripState, in_background: Duration, threshold: Duration) -> bool {
    state == TripState::InTrip && in_background > threshold
}
