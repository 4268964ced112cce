mod aggregator;
mod controller;
pub mod scoring;
mod state;

pub use aggregator::{Coordinate, TripAggregator};
pub use controller::{TripController, TripSnapshot};
pub use state::{DetectionThresholds, TripAction, TripMachine, TripState};
