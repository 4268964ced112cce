use anyhow::{anyhow, bail, Context, Result};
use log::info;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::trip::TripController;

use super::loop_worker::ingest_loop;
use super::SensorReading;

/// Handle the host's sensor callbacks push readings through. Sending never
/// blocks.
pub type SensorSender = mpsc::UnboundedSender<SensorReading>;

/// Owns the ingest task that funnels sensor callbacks onto the trip
/// controller one at a time.
#[derive(Default)]
pub struct SensingController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    sender: Option<SensorSender>,
}

impl SensingController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start_sensing(&mut self, trip: TripController) -> Result<SensorSender> {
        if self.handle.is_some() {
            bail!("sensing already active");
        }

        let cancel_token = CancellationToken::new();
        let (sender, receiver) = mpsc::unbounded_channel();

        let handle = tokio::spawn(ingest_loop(receiver, trip, cancel_token.clone()));

        info!("Sensor ingest started");
        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.sender = Some(sender.clone());
        Ok(sender)
    }

    pub fn submit(&self, reading: SensorReading) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("sensing not active"))?;
        sender
            .send(reading)
            .map_err(|_| anyhow!("sensor ingest loop has exited"))
    }

    /// Stops the loop after it has drained readings already queued.
    pub async fn stop_sensing(&mut self) -> Result<()> {
        self.sender = None;
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("sensor ingest task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}
