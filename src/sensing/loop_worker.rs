use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::trip::TripController;

use super::SensorReading;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

pub async fn ingest_loop(
    mut receiver: mpsc::UnboundedReceiver<SensorReading>,
    trip: TripController,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            reading = receiver.recv() => {
                match reading {
                    Some(reading) => dispatch(&trip, reading).await,
                    None => {
                        log_info!("sensor channel closed, ingest loop exiting");
                        return;
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                break;
            }
        }
    }

    let mut drained = 0usize;
    while let Ok(reading) = receiver.try_recv() {
        dispatch(&trip, reading).await;
        drained += 1;
    }
    log_info!("sensor ingest shutting down ({drained} queued readings drained)");
}

async fn dispatch(trip: &TripController, reading: SensorReading) {
    match reading {
        SensorReading::Speed(speed) => {
            let state = trip.handle_reading(speed).await;
            log_debug!("speed {:.1} m/s -> {state}", speed.speed_mps);
        }
        SensorReading::Motion(sample) => {
            trip.handle_motion(sample).await;
        }
        SensorReading::Failure(reason) => {
            log_warn!("sensor read failed, sample dropped: {reason}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::enforcement::EnforcementGate;
    use crate::events::event_bus;
    use crate::sensing::{SensingController, SpeedReading};
    use crate::settings::TripSettings;
    use crate::store::MemoryStore;
    use crate::testing::RecordingEnforcer;
    use crate::trip::TripState;

    fn trip_controller() -> TripController {
        let (events, _) = event_bus(8);
        TripController::new(
            &TripSettings::default(),
            Arc::new(MemoryStore::new()),
            EnforcementGate::new(Arc::new(RecordingEnforcer::default())),
            events,
        )
    }

    #[tokio::test]
    async fn queued_readings_are_drained_on_stop() {
        let trip = trip_controller();
        let mut sensing = SensingController::new();
        let sender = sensing.start_sensing(trip.clone()).unwrap();

        sender
            .send(SensorReading::Failure("gps unavailable".into()))
            .unwrap();
        sender
            .send(SensorReading::Speed(SpeedReading::from_mph(-4.0)))
            .unwrap();
        sender
            .send(SensorReading::Speed(SpeedReading::from_mph(30.0)))
            .unwrap();
        sensing.stop_sensing().await.unwrap();

        assert_eq!(trip.state().await, TripState::Detecting);
        let history = trip.speed_history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], 0.0);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let mut sensing = SensingController::new();
        assert!(!sensing.is_active());
        sensing.start_sensing(trip_controller()).unwrap();
        assert!(sensing.is_active());
        assert!(sensing.start_sensing(trip_controller()).is_err());
        sensing.stop_sensing().await.unwrap();
        assert!(!sensing.is_active());
        assert!(sensing.submit(SensorReading::Failure("late".into())).is_err());
    }
}
