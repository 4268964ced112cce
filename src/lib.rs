pub mod db;
pub mod enforcement;
pub mod events;
pub mod lifecycle;
pub mod sensing;
pub mod settings;
pub mod stats;
pub mod store;
pub mod trip;
mod utils;

#[cfg(test)]
mod testing;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use chrono::Utc;
use log::{error, info};
use tokio::sync::Mutex;

use db::{Database, TripRecord};
use enforcement::{EnforcementGate, EnforcementSelection, Enforcer};
use events::{event_bus, EventReceiver, DEFAULT_EVENT_CAPACITY};
use lifecycle::{BackgroundExecution, LifecycleEvent, LifecycleMonitor};
use sensing::{SensingController, SensorReading, SensorSender};
use settings::{SettingsStore, TripSettings, SETTINGS_FILE};
use stats::TripSummary;
use store::TripStore;
use trip::{TripController, TripSnapshot, TripState};

pub use utils::logging::init_logging;

pub const DATABASE_FILE: &str = "copilot.sqlite3";
pub const DEFAULT_RECENT_TRIPS: usize = 50;

/// Outcome of [`CoPilot::launch`].
pub struct Launch {
    pub app: CoPilot,
    /// The previous process was terminated mid-session. Reported once.
    pub was_force_quit: bool,
    /// State the trip controller resumed in after recovery.
    pub restored_state: TripState,
}

/// The trip core wired together: one trip controller, one lifecycle
/// monitor, one enforcement gate, all sharing one store.
pub struct CoPilot {
    settings: SettingsStore,
    store: Arc<dyn TripStore>,
    gate: EnforcementGate,
    trip: TripController,
    monitor: LifecycleMonitor,
    sensing: Mutex<SensingController>,
    sensor_tx: SensorSender,
}

impl CoPilot {
    /// Opens (or creates) the SQLite store and settings under `data_dir`,
    /// recovers any interrupted trip and starts sensor ingest.
    pub async fn launch(
        data_dir: &Path,
        enforcer: Arc<dyn Enforcer>,
        background: Arc<dyn BackgroundExecution>,
    ) -> Result<Launch> {
        init_logging();
        info!("CoPilot starting up...");

        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let settings = SettingsStore::new(data_dir.join(SETTINGS_FILE))?;
        let database = Database::new(data_dir.join(DATABASE_FILE))?;

        Self::launch_with_store(settings, Arc::new(database), enforcer, background).await
    }

    pub async fn launch_with_store(
        settings: SettingsStore,
        store: Arc<dyn TripStore>,
        enforcer: Arc<dyn Enforcer>,
        background: Arc<dyn BackgroundExecution>,
    ) -> Result<Launch> {
        let config = settings.get();

        let gate = EnforcementGate::new(enforcer);
        if let Err(err) = gate.reload_from(store.as_ref()).await {
            error!("Failed to load enforcement selection: {err:?}");
        }

        let (events, _) = event_bus(DEFAULT_EVENT_CAPACITY);
        let trip = TripController::new(&config, store.clone(), gate.clone(), events);
        let monitor = LifecycleMonitor::new(
            &config,
            trip.clone(),
            gate.clone(),
            store.clone(),
            background,
        );

        let was_force_quit = monitor.check_previous_force_quit().await;
        let restored_state = trip.restore_from_store().await;
        monitor.reconcile().await;

        let mut sensing = SensingController::new();
        let sensor_tx = sensing.start_sensing(trip.clone())?;

        info!("CoPilot ready (trip state {restored_state})");

        Ok(Launch {
            app: Self {
                settings,
                store,
                gate,
                trip,
                monitor,
                sensing: Mutex::new(sensing),
                sensor_tx,
            },
            was_force_quit,
            restored_state,
        })
    }

    /// Channel for platform sensor callbacks.
    pub fn sensor_sender(&self) -> SensorSender {
        self.sensor_tx.clone()
    }

    pub fn submit_reading(&self, reading: SensorReading) -> Result<()> {
        self.sensor_tx
            .send(reading)
            .map_err(|_| anyhow::anyhow!("sensor ingest has stopped"))
    }

    pub async fn handle_lifecycle(&self, event: LifecycleEvent) {
        self.monitor.handle(event).await;
    }

    pub async fn start_manual_trip(&self) -> Result<TripState> {
        self.trip.start_manual_trip().await
    }

    pub async fn end_trip_now(&self) -> Result<TripState> {
        self.trip.end_trip_now().await
    }

    pub async fn snapshot(&self) -> TripSnapshot {
        self.trip.snapshot().await
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.trip.subscribe()
    }

    pub fn trip(&self) -> &TripController {
        &self.trip
    }

    pub fn monitor(&self) -> &LifecycleMonitor {
        &self.monitor
    }

    pub fn selection(&self) -> EnforcementSelection {
        self.gate.selection()
    }

    /// Caches the selection for enforcement and persists it for recovery.
    pub async fn set_selection(&self, selection: EnforcementSelection) -> Result<()> {
        self.gate.set_selection(selection.clone());
        self.store
            .save_selection(&selection)
            .await
            .context("failed to persist enforcement selection")
    }

    pub async fn recent_trips(&self, limit: Option<usize>) -> Result<Vec<TripRecord>> {
        self.store
            .list_recent_trips(limit.unwrap_or(DEFAULT_RECENT_TRIPS))
            .await
    }

    pub async fn weekly_summary(&self) -> Result<TripSummary> {
        let now = Utc::now();
        let trips = self
            .store
            .trips_since(now - chrono::Duration::days(stats::WEEK_DAYS))
            .await?;
        Ok(stats::weekly_summary(&trips, now))
    }

    pub fn settings(&self) -> TripSettings {
        self.settings.get()
    }

    /// Persists new tunables; they apply from the next launch.
    pub fn update_settings(&self, settings: TripSettings) -> Result<()> {
        self.settings.update(settings)
    }

    /// Stops sensor ingest after draining queued readings.
    pub async fn shutdown(&self) -> Result<()> {
        self.sensing.lock().await.stop_sensing().await
    }
}
