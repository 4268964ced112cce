use std::{sync::Arc, time::Duration};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::{sync::Mutex, task::JoinHandle, time::Instant};
use uuid::Uuid;

use crate::{
    enforcement::EnforcementGate,
    events::{publish, EventReceiver, EventSender, TripEvent},
    sensing::{AccelSample, SpeedFilter, SpeedHistory, SpeedReading, VehicleMotionDetector},
    settings::TripSettings,
    store::TripStore,
};

use super::{Coordinate, TripAction, TripAggregator, TripMachine, TripState};

/// Point-in-time view of the controller for observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripSnapshot {
    pub state: TripState,
    pub current_speed_mph: f64,
    pub is_still_driving: bool,
    pub trip_id: Option<String>,
    pub distance_m: f64,
    pub trip_start_time: Option<DateTime<Utc>>,
    pub vehicle_motion: bool,
}

struct Inner {
    machine: TripMachine,
    aggregator: TripAggregator,
    filter: SpeedFilter,
    history: SpeedHistory,
    motion: VehicleMotionDetector,
    last_fix: Option<Coordinate>,
    current_speed_mph: f64,
    readings_since_checkpoint: u32,
    timer: Option<JoinHandle<()>>,
}

impl Inner {
    fn cancel_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }
}

/// Serialized decision path for trip detection.
///
/// Readings, timer firings, manual commands and restore all run under one
/// lock, so transitions never interleave. Persistence is best effort: store
/// errors are logged and the in-memory state stays authoritative.
#[derive(Clone)]
pub struct TripController {
    inner: Arc<Mutex<Inner>>,
    store: Arc<dyn TripStore>,
    gate: EnforcementGate,
    events: EventSender,
    checkpoint_every: u32,
}

impl TripController {
    pub fn new(
        settings: &TripSettings,
        store: Arc<dyn TripStore>,
        gate: EnforcementGate,
        events: EventSender,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                machine: TripMachine::new(settings.thresholds()),
                aggregator: TripAggregator::new(),
                filter: SpeedFilter::new(),
                history: SpeedHistory::new(),
                motion: VehicleMotionDetector::new(),
                last_fix: None,
                current_speed_mph: 0.0,
                readings_since_checkpoint: 0,
                timer: None,
            })),
            store,
            gate,
            events,
            checkpoint_every: settings.checkpoint_interval(),
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn gate(&self) -> &EnforcementGate {
        &self.gate
    }

    pub async fn state(&self) -> TripState {
        self.inner.lock().await.machine.state()
    }

    pub async fn snapshot(&self) -> TripSnapshot {
        let inner = self.inner.lock().await;
        let state = inner.machine.state();
        TripSnapshot {
            state,
            current_speed_mph: inner.current_speed_mph,
            is_still_driving: state.has_trip(),
            trip_id: inner.aggregator.trip_id().map(str::to_string),
            distance_m: inner.aggregator.distance_m(),
            trip_start_time: inner.aggregator.start_time(),
            vehicle_motion: inner.motion.is_vehicle_motion(),
        }
    }

    /// Fixes recorded for the current trip, start location first.
    pub async fn route(&self) -> Vec<Coordinate> {
        self.inner.lock().await.aggregator.route().to_vec()
    }

    /// Speed history in mph, oldest first.
    pub async fn speed_history(&self) -> Vec<f64> {
        self.inner.lock().await.history.to_vec()
    }

    pub async fn handle_reading(&self, reading: SpeedReading) -> TripState {
        let mut inner = self.inner.lock().await;

        let speed_mph = match inner.filter.accept(&reading) {
            Ok(speed) => speed,
            Err(reason) => {
                debug!("Dropped speed reading: {reason}");
                return inner.machine.state();
            }
        };

        inner.current_speed_mph = speed_mph;
        inner.history.push(speed_mph);

        if let Some(fix) = reading.coordinate.filter(Coordinate::is_valid) {
            if inner.machine.state().has_trip() {
                inner.aggregator.add_fix(fix);
            }
            inner.last_fix = Some(fix);
        }

        let action = inner.machine.on_speed(speed_mph, Instant::now());
        match action {
            Some(action) => self.apply_action(&mut inner, action).await,
            None => self.maybe_checkpoint(&mut inner).await,
        }

        inner.machine.state()
    }

    pub async fn handle_motion(&self, sample: AccelSample) -> bool {
        self.inner.lock().await.motion.push(sample)
    }

    pub async fn start_manual_trip(&self) -> Result<TripState> {
        let mut inner = self.inner.lock().await;
        let Some(action) = inner.machine.start_manual(Instant::now()) else {
            bail!("trip already active");
        };
        self.apply_action(&mut inner, action).await;
        Ok(inner.machine.state())
    }

    pub async fn end_trip_now(&self) -> Result<TripState> {
        let mut inner = self.inner.lock().await;
        let Some(action) = inner.machine.finish_now(Instant::now()) else {
            bail!("no active trip to end");
        };
        self.apply_action(&mut inner, action).await;
        Ok(inner.machine.state())
    }

    /// Picks up a trip interrupted by process death. Returns the state the
    /// controller resumed in.
    pub async fn restore_from_store(&self) -> TripState {
        let snapshot = match self.store.load_active_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!("Failed to load active trip snapshot: {err:?}");
                return self.state().await;
            }
        };

        let Some(snapshot) = snapshot else {
            return self.state().await;
        };

        let mut inner = self.inner.lock().await;
        let action = inner.machine.restore(snapshot.state, Instant::now());
        let state = inner.machine.state();

        if !state.has_trip() {
            info!(
                "Discarding active snapshot {} left in state {}",
                snapshot.trip_id, snapshot.state
            );
            if let Err(err) = self.store.delete_active_snapshot().await {
                error!("Failed to delete stale trip snapshot: {err:?}");
            }
            return state;
        }

        inner.aggregator.restore(&snapshot);
        inner.history = SpeedHistory::from_samples(&snapshot.speed_history);
        inner.last_fix = snapshot.route.last().copied().or(snapshot.start_location);

        if !self.gate.apply() {
            warn!("Restored trip {} with no enforcement selection", snapshot.trip_id);
        }

        if let Some(TripAction::ArmStop { generation, after }) = action {
            self.arm_timer(&mut inner, generation, after);
        }

        info!("Restored trip {} in state {}", snapshot.trip_id, state);
        publish(&self.events, TripEvent::StateChanged { state });
        state
    }

    async fn on_timer(&self, generation: u64) {
        let mut inner = self.inner.lock().await;
        if generation != inner.machine.generation() {
            debug!("Ignoring stale trip timer (generation {generation})");
            return;
        }

        // This task is the one in `timer`; detach instead of aborting itself.
        inner.timer = None;

        if let Some(action) = inner.machine.on_timer(generation, Instant::now()) {
            self.apply_action(&mut inner, action).await;
        }
    }

    async fn apply_action(&self, inner: &mut Inner, action: TripAction) {
        match action {
            TripAction::ArmDetection { generation, after } => {
                self.arm_timer(inner, generation, after);
            }
            TripAction::CancelDetection => {
                inner.cancel_timer();
            }
            TripAction::BeginTrip => {
                inner.cancel_timer();
                self.begin_trip(inner).await;
            }
            TripAction::ArmStop { generation, after } => {
                self.arm_timer(inner, generation, after);
                self.persist_snapshot(inner).await;
            }
            TripAction::ResumeTrip => {
                inner.cancel_timer();
                self.persist_snapshot(inner).await;
            }
            TripAction::FinishTrip => {
                inner.cancel_timer();
                self.finish_trip(inner).await;
            }
        }

        publish(
            &self.events,
            TripEvent::StateChanged {
                state: inner.machine.state(),
            },
        );
    }

    async fn begin_trip(&self, inner: &mut Inner) {
        let trip_id = Uuid::new_v4().to_string();
        inner
            .aggregator
            .begin(trip_id.clone(), Utc::now(), inner.last_fix);

        if !self.gate.apply() {
            warn!("Trip {trip_id} started with an empty enforcement selection");
        }

        self.persist_snapshot(inner).await;
        info!("Trip {trip_id} started");
        publish(&self.events, TripEvent::TripStarted);
    }

    async fn finish_trip(&self, inner: &mut Inner) {
        let record = inner.aggregator.finalize(
            Utc::now(),
            inner.last_fix,
            &inner.history,
            self.gate.apps_blocked_count(),
        );

        match record {
            Some(record) => {
                info!(
                    "Trip {} ended: {:.0}s, {:.0}m, score {}",
                    record.id, record.duration_secs, record.distance_m, record.safety_score
                );
                if let Err(err) = self.store.save_completed_trip(&record).await {
                    error!("Failed to save completed trip {}: {err:?}", record.id);
                }
            }
            None => {
                warn!("Trip ended without a start time or location; no record saved");
                if let Err(err) = self.store.delete_active_snapshot().await {
                    error!("Failed to delete active trip snapshot: {err:?}");
                }
            }
        }

        self.gate.reset();
        publish(&self.events, TripEvent::TripEnded);
        inner.aggregator.reset();
        inner.readings_since_checkpoint = 0;
    }

    async fn maybe_checkpoint(&self, inner: &mut Inner) {
        if !inner.machine.state().has_trip() {
            return;
        }

        inner.readings_since_checkpoint += 1;
        if inner.readings_since_checkpoint >= self.checkpoint_every {
            self.persist_snapshot(inner).await;
        }
    }

    async fn persist_snapshot(&self, inner: &mut Inner) {
        inner.readings_since_checkpoint = 0;
        let Some(snapshot) = inner.aggregator.snapshot(
            inner.machine.state(),
            &inner.history,
            self.gate.apps_blocked_count(),
        ) else {
            return;
        };

        if let Err(err) = self.store.save_active_snapshot(&snapshot).await {
            error!(
                "Failed to persist snapshot for trip {}: {err:?}",
                snapshot.trip_id
            );
        }
    }

    fn arm_timer(&self, inner: &mut Inner, generation: u64, after: Duration) {
        inner.cancel_timer();
        let controller = self.clone();
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            controller.on_timer(generation).await;
        }));
    }
}
