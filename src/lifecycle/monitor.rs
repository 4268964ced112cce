use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use log::{error, info, warn};
use tokio::{task::JoinHandle, time::Instant};

use crate::{
    enforcement::EnforcementGate,
    settings::TripSettings,
    store::{RecoveryFlag, TripStore},
    trip::{TripController, TripState},
};

use super::{should_enforce, BackgroundExecution, BackgroundTaskId, LifecycleEvent};

#[derive(Debug, Clone, Copy)]
struct MonitorTiming {
    first_check: Duration,
    check_interval: Duration,
    force_quit_after: Duration,
    retry_delay: Duration,
}

#[derive(Default)]
struct MonitorState {
    background_since: Option<Instant>,
    task: Option<BackgroundTaskId>,
    /// Bumped on every background/foreground edge; a check loop from an
    /// older edge stops at its next wake-up.
    generation: u64,
    checker: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct LifecycleMonitor {
    state: Arc<Mutex<MonitorState>>,
    trip: TripController,
    gate: EnforcementGate,
    store: Arc<dyn TripStore>,
    background: Arc<dyn BackgroundExecution>,
    timing: MonitorTiming,
}

impl LifecycleMonitor {
    pub fn new(
        settings: &TripSettings,
        trip: TripController,
        gate: EnforcementGate,
        store: Arc<dyn TripStore>,
        background: Arc<dyn BackgroundExecution>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(MonitorState::default())),
            trip,
            gate,
            store,
            background,
            timing: MonitorTiming {
                first_check: settings.first_background_check(),
                check_interval: settings.background_check_interval(),
                force_quit_after: settings.force_quit_after(),
                retry_delay: settings.selection_retry_delay(),
            },
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_in_background(&self) -> bool {
        self.lock().background_since.is_some()
    }

    pub fn background_elapsed(&self) -> Option<Duration> {
        self.lock()
            .background_since
            .map(|since| Instant::now().saturating_duration_since(since))
    }

    pub async fn handle(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::EnteredBackground => self.entered_background(),
            LifecycleEvent::WillEnterForeground => {
                self.leave_background();
                self.reconcile().await;
            }
            LifecycleEvent::WillTerminate => {
                info!("Process terminating; raising shield");
                self.enforce_now().await;
                self.mark_terminated().await;
            }
            LifecycleEvent::BackgroundGrantExpired => {
                warn!("Background grant expired; raising shield");
                self.enforce_now().await;
                self.mark_terminated().await;
                self.end_background_task();
            }
        }
    }

    /// Read-once: whether the previous process was terminated mid-session.
    pub async fn check_previous_force_quit(&self) -> bool {
        match self.store.take_flag(RecoveryFlag::WasForceQuit).await {
            Ok(was_force_quit) => {
                if was_force_quit {
                    info!("Previous process was force-quit");
                }
                was_force_quit
            }
            Err(err) => {
                error!("Failed to read force-quit flag: {err:?}");
                false
            }
        }
    }

    /// Releases a fail-safe shield once no trip is active. A shield raised
    /// for a legitimate trip stays up.
    pub async fn reconcile(&self) {
        let flagged = match self.store.flag(RecoveryFlag::AppsBlockedDueToForceQuit).await {
            Ok(flagged) => flagged,
            Err(err) => {
                error!("Failed to read force-quit block flag: {err:?}");
                false
            }
        };

        if !flagged && !self.gate.is_recovery_hold() {
            return;
        }

        let state = self.trip.state().await;
        if state != TripState::Idle {
            info!("Keeping force-quit shield while trip is {state}");
            return;
        }

        info!("No active trip; releasing force-quit shield");
        self.gate.reset();
        if let Err(err) = self
            .store
            .set_flag(RecoveryFlag::AppsBlockedDueToForceQuit, false)
            .await
        {
            error!("Failed to clear force-quit block flag: {err:?}");
        }
    }

    fn entered_background(&self) {
        let mut state = self.lock();
        state.generation = state.generation.wrapping_add(1);
        if state.background_since.is_none() {
            state.background_since = Some(Instant::now());
        }
        if state.task.is_none() {
            state.task = self.background.begin();
            if state.task.is_none() {
                warn!("Background execution grant refused");
            }
        }

        if let Some(handle) = state.checker.take() {
            handle.abort();
        }

        let generation = state.generation;
        let monitor = self.clone();
        state.checker = Some(tokio::spawn(async move {
            monitor.check_loop(generation).await;
        }));
    }

    fn leave_background(&self) {
        let mut state = self.lock();
        state.generation = state.generation.wrapping_add(1);
        state.background_since = None;
        if let Some(handle) = state.checker.take() {
            handle.abort();
        }
        drop(state);
        self.end_background_task();
    }

    fn end_background_task(&self) {
        let task = self.lock().task.take();
        if let Some(id) = task {
            self.background.end(id);
        }
    }

    async fn check_loop(&self, generation: u64) {
        tokio::time::sleep(self.timing.first_check).await;
        while self.check(generation).await {
            tokio::time::sleep(self.timing.check_interval).await;
        }
    }

    /// One background check. Returns whether another check should follow.
    async fn check(&self, generation: u64) -> bool {
        let elapsed = {
            let state = self.lock();
            if state.generation != generation {
                return false;
            }
            match state.background_since {
                Some(since) => Instant::now().saturating_duration_since(since),
                None => return false,
            }
        };

        let trip_state = self.trip.state().await;
        if should_enforce(trip_state, elapsed, self.timing.force_quit_after) {
            info!(
                "Backgrounded {:.0}s during a trip; raising shield",
                elapsed.as_secs_f64()
            );
            self.enforce_now().await;
            return false;
        }

        true
    }

    /// Applies the shield directly. With no cached selection, reloads it from
    /// the store once and retries after a short delay, then gives up.
    async fn enforce_now(&self) -> bool {
        if self.gate.apply_for_recovery() {
            self.mark_blocked().await;
            return true;
        }

        info!("Enforcement selection empty; reloading from store");
        if let Err(err) = self.gate.reload_from(self.store.as_ref()).await {
            error!("Failed to reload enforcement selection: {err:?}");
        }

        tokio::time::sleep(self.timing.retry_delay).await;
        if self.gate.apply_for_recovery() {
            self.mark_blocked().await;
            return true;
        }

        warn!("No enforcement selection available; shield not applied");
        false
    }

    async fn mark_blocked(&self) {
        if let Err(err) = self
            .store
            .set_flag(RecoveryFlag::AppsBlockedDueToForceQuit, true)
            .await
        {
            error!("Failed to persist force-quit block flag: {err:?}");
        }
    }

    async fn mark_terminated(&self) {
        if let Err(err) = self.store.set_flag(RecoveryFlag::WasForceQuit, true).await {
            error!("Failed to persist termination flag: {err:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcement::EnforcementSelection;
    use crate::events::event_bus;
    use crate::store::MemoryStore;
    use crate::testing::{advance, RecordingBackground, RecordingEnforcer};

    struct Harness {
        monitor: LifecycleMonitor,
        trip: TripController,
        gate: EnforcementGate,
        store: Arc<MemoryStore>,
        enforcer: Arc<RecordingEnforcer>,
        background: Arc<RecordingBackground>,
    }

    fn harness_with(background: RecordingBackground) -> Harness {
        let settings = TripSettings::default();
        let store = Arc::new(MemoryStore::new());
        let enforcer = Arc::new(RecordingEnforcer::default());
        let background = Arc::new(background);
        let gate = EnforcementGate::new(enforcer.clone());
        let (events, _) = event_bus(16);
        let trip = TripController::new(&settings, store.clone(), gate.clone(), events);
        let monitor = LifecycleMonitor::new(
            &settings,
            trip.clone(),
            gate.clone(),
            store.clone(),
            background.clone(),
        );
        Harness {
            monitor,
            trip,
            gate,
            store,
            enforcer,
            background,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingBackground::default())
    }

    fn selection() -> EnforcementSelection {
        EnforcementSelection::new(["com.example.chat"], ["social"])
    }

    #[tokio::test(start_paused = true)]
    async fn idle_background_never_enforces_and_foreground_ends_grant() {
        let h = harness();
        h.gate.set_selection(selection());

        h.monitor.handle(LifecycleEvent::EnteredBackground).await;
        assert_eq!(h.background.begun().len(), 1);
        advance(60.0).await;
        assert!(h.monitor.is_in_background());
        assert_eq!(h.enforcer.apply_count(), 0);

        h.monitor.handle(LifecycleEvent::WillEnterForeground).await;
        assert!(!h.monitor.is_in_background());
        assert_eq!(h.background.ended(), h.background.begun());
    }

    #[tokio::test(start_paused = true)]
    async fn foreground_before_threshold_cancels_checks() {
        let h = harness();
        h.gate.set_selection(selection());
        h.trip.start_manual_trip().await.unwrap();

        h.monitor.handle(LifecycleEvent::EnteredBackground).await;
        advance(20.0).await;
        h.monitor.handle(LifecycleEvent::WillEnterForeground).await;
        advance(60.0).await;

        assert_eq!(h.enforcer.apply_count(), 1);
        assert!(!h.gate.is_recovery_hold());
        assert!(!h
            .store
            .flag(RecoveryFlag::AppsBlockedDueToForceQuit)
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn refused_grant_still_runs_checks() {
        let h = harness_with(RecordingBackground::refusing());
        h.gate.set_selection(selection());
        h.trip.start_manual_trip().await.unwrap();

        h.monitor.handle(LifecycleEvent::EnteredBackground).await;
        advance(35.0).await;

        assert!(h.gate.is_recovery_hold());
        assert!(h.background.begun().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_with_empty_cache_reloads_selection() {
        let h = harness();
        h.store.save_selection(&selection()).await.unwrap();

        h.monitor.handle(LifecycleEvent::WillTerminate).await;

        assert_eq!(h.enforcer.apply_count(), 1);
        assert!(h.store.flag(RecoveryFlag::WasForceQuit).await.unwrap());
        assert!(h
            .store
            .flag_set_at(RecoveryFlag::AppsBlockedDueToForceQuit)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_selection_gives_up_quietly() {
        let h = harness();

        h.monitor.handle(LifecycleEvent::BackgroundGrantExpired).await;

        assert_eq!(h.enforcer.apply_count(), 0);
        assert!(!h
            .store
            .flag(RecoveryFlag::AppsBlockedDueToForceQuit)
            .await
            .unwrap());
        assert!(h.store.flag(RecoveryFlag::WasForceQuit).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_grant_raises_shield_and_ends_the_grant() {
        let h = harness();
        h.gate.set_selection(selection());
        h.trip.start_manual_trip().await.unwrap();

        h.monitor.handle(LifecycleEvent::EnteredBackground).await;
        let granted = h.background.begun();
        assert_eq!(granted.len(), 1);

        h.monitor
            .handle(LifecycleEvent::BackgroundGrantExpired)
            .await;

        assert_eq!(h.enforcer.apply_count(), 2);
        assert!(h.gate.is_recovery_hold());
        assert!(h
            .store
            .flag(RecoveryFlag::AppsBlockedDueToForceQuit)
            .await
            .unwrap());
        assert!(h.store.flag(RecoveryFlag::WasForceQuit).await.unwrap());
        assert_eq!(h.background.ended(), granted);
    }

    #[tokio::test(start_paused = true)]
    async fn foreground_releases_shield_only_when_idle() {
        let h = harness();
        h.gate.set_selection(selection());
        h.trip.start_manual_trip().await.unwrap();
        h.monitor.handle(LifecycleEvent::WillTerminate).await;

        h.monitor.handle(LifecycleEvent::WillEnterForeground).await;
        assert_eq!(h.enforcer.reset_count(), 0);
        assert!(h
            .store
            .flag(RecoveryFlag::AppsBlockedDueToForceQuit)
            .await
            .unwrap());

        h.trip.end_trip_now().await.unwrap();
        h.monitor.handle(LifecycleEvent::WillEnterForeground).await;
        assert!(!h
            .store
            .flag(RecoveryFlag::AppsBlockedDueToForceQuit)
            .await
            .unwrap());
        assert!(!h.gate.is_shielded());
    }

    #[tokio::test]
    async fn previous_force_quit_is_read_once() {
        let h = harness();
        h.store
            .set_flag(RecoveryFlag::WasForceQuit, true)
            .await
            .unwrap();

        assert!(h.monitor.check_previous_force_quit().await);
        assert!(!h.monitor.check_previous_force_quit().await);
    }
}
