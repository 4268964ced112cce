use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::trip::TripState;

/// Notifications published by the trip controller for observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TripEvent {
    StateChanged { state: TripState },
    TripStarted,
    TripEnded,
}

pub type EventSender = broadcast::Sender<TripEvent>;
pub type EventReceiver = broadcast::Receiver<TripEvent>;

pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Create a broadcast event bus with the given capacity.
pub fn event_bus(capacity: usize) -> (EventSender, EventReceiver) {
    broadcast::channel(capacity)
}

/// Publishes without caring whether anyone is listening.
pub(crate) fn publish(sender: &EventSender, event: TripEvent) {
    let _ = sender.send(event);
}
