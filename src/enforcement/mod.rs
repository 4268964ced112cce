//! App shielding as seen by the trip core.
//!
//! The platform shield is an [`Enforcer`]. Both the trip controller and the
//! lifecycle monitor drive it through one shared [`EnforcementGate`], which
//! caches the user's selection and collapses redundant apply/reset calls.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::store::TripStore;

/// Platform actuator. Calls must be safe to repeat; failures stay on the
/// enforcer's side of the boundary.
pub trait Enforcer: Send + Sync {
    fn apply(&self, selection: &EnforcementSelection);
    fn reset(&self);
}

/// Opaque application and category tokens picked by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementSelection {
    pub applications: BTreeSet<String>,
    pub categories: BTreeSet<String>,
}

impl EnforcementSelection {
    pub fn new<A, C>(applications: A, categories: C) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            applications: applications.into_iter().map(Into::into).collect(),
            categories: categories.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty() && self.categories.is_empty()
    }

    pub fn len(&self) -> usize {
        self.applications.len() + self.categories.len()
    }
}

#[derive(Default)]
struct GateState {
    selection: EnforcementSelection,
    /// `None` until this process has applied or reset once; a shield left
    /// behind by a previous process is not visible from here.
    shielded: Option<bool>,
    /// Shield was raised by the force-quit fail-safe, not by a trip start.
    recovery_hold: bool,
}

#[derive(Clone)]
pub struct EnforcementGate {
    enforcer: Arc<dyn Enforcer>,
    state: Arc<Mutex<GateState>>,
}

impl EnforcementGate {
    pub fn new(enforcer: Arc<dyn Enforcer>) -> Self {
        Self {
            enforcer,
            state: Arc::new(Mutex::new(GateState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn selection(&self) -> EnforcementSelection {
        self.lock().selection.clone()
    }

    /// Replaces the cached selection. An active shield is re-applied so it
    /// tracks the new choice.
    pub fn set_selection(&self, selection: EnforcementSelection) {
        let mut state = self.lock();
        state.selection = selection;
        if state.shielded == Some(true) && !state.selection.is_empty() {
            self.enforcer.apply(&state.selection);
        }
    }

    pub fn apps_blocked_count(&self) -> u32 {
        u32::try_from(self.lock().selection.len()).unwrap_or(u32::MAX)
    }

    pub fn is_shielded(&self) -> bool {
        self.lock().shielded == Some(true)
    }

    pub fn is_recovery_hold(&self) -> bool {
        self.lock().recovery_hold
    }

    /// Shields the cached selection. Returns `false` when there is nothing to
    /// apply (selection empty).
    pub fn apply(&self) -> bool {
        let mut state = self.lock();
        if state.selection.is_empty() {
            return false;
        }
        if state.shielded != Some(true) {
            self.enforcer.apply(&state.selection);
            state.shielded = Some(true);
        }
        true
    }

    /// Fail-safe apply for the force-quit path. Always reaches the enforcer,
    /// even when this process believes the shield is already up, and marks
    /// the shield as held for recovery.
    pub fn apply_for_recovery(&self) -> bool {
        let mut state = self.lock();
        if state.selection.is_empty() {
            return false;
        }
        self.enforcer.apply(&state.selection);
        state.shielded = Some(true);
        state.recovery_hold = true;
        true
    }

    pub fn reset(&self) {
        let mut state = self.lock();
        if state.shielded != Some(false) {
            self.enforcer.reset();
            state.shielded = Some(false);
        }
        state.recovery_hold = false;
    }

    /// Refreshes the cached selection from the store. Returns whether a
    /// non-empty selection is now cached.
    pub async fn reload_from(&self, store: &dyn TripStore) -> Result<bool> {
        match store.load_selection().await? {
            Some(selection) if !selection.is_empty() => {
                info!(
                    "Loaded enforcement selection ({} entries)",
                    selection.len()
                );
                self.set_selection(selection);
                Ok(true)
            }
            _ => {
                warn!("No stored enforcement selection");
                Ok(!self.lock().selection.is_empty())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::{EnforcerCall, RecordingEnforcer};

    fn selection() -> EnforcementSelection {
        EnforcementSelection::new(["com.example.chat", "com.example.video"], ["social"])
    }

    #[test]
    fn apply_and_reset_are_idempotent() {
        let enforcer = Arc::new(RecordingEnforcer::default());
        let gate = EnforcementGate::new(enforcer.clone());
        gate.set_selection(selection());

        assert!(gate.apply());
        assert!(gate.apply());
        gate.reset();
        gate.reset();

        assert_eq!(
            enforcer.calls(),
            vec![EnforcerCall::Apply(3), EnforcerCall::Reset]
        );
    }

    #[test]
    fn first_reset_in_a_process_always_reaches_the_enforcer() {
        let enforcer = Arc::new(RecordingEnforcer::default());
        let gate = EnforcementGate::new(enforcer.clone());
        gate.reset();
        assert_eq!(enforcer.calls(), vec![EnforcerCall::Reset]);
    }

    #[test]
    fn empty_selection_is_not_applied() {
        let enforcer = Arc::new(RecordingEnforcer::default());
        let gate = EnforcementGate::new(enforcer.clone());
        assert!(!gate.apply());
        assert!(!gate.is_shielded());
        assert!(enforcer.calls().is_empty());
    }

    #[test]
    fn recovery_apply_always_reaches_enforcer_and_holds() {
        let enforcer = Arc::new(RecordingEnforcer::default());
        let gate = EnforcementGate::new(enforcer.clone());
        gate.set_selection(selection());
        gate.apply();
        assert!(gate.apply_for_recovery());
        assert!(gate.is_recovery_hold());
        assert_eq!(enforcer.apply_count(), 2);

        gate.reset();
        assert!(!gate.is_recovery_hold());
        assert!(!gate.is_shielded());
    }

    #[test]
    fn changing_selection_while_shielded_reapplies() {
        let enforcer = Arc::new(RecordingEnforcer::default());
        let gate = EnforcementGate::new(enforcer.clone());
        gate.set_selection(selection());
        gate.apply();
        gate.set_selection(EnforcementSelection::new(["com.example.games"], Vec::<String>::new()));

        assert_eq!(
            enforcer.calls(),
            vec![EnforcerCall::Apply(3), EnforcerCall::Apply(1)]
        );
        assert_eq!(gate.apps_blocked_count(), 1);
    }

    #[tokio::test]
    async fn reload_pulls_selection_from_store() {
        let store = MemoryStore::new();
        let gate = EnforcementGate::new(Arc::new(RecordingEnforcer::default()));
        assert!(!gate.reload_from(&store).await.unwrap());

        store.save_selection(&selection()).await.unwrap();
        assert!(gate.reload_from(&store).await.unwrap());
        assert_eq!(gate.selection(), selection());
    }
}
