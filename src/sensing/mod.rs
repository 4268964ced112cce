mod controller;
mod loop_worker;
mod motion;
mod speed;

pub use controller::{SensingController, SensorSender};
pub use motion::{AccelSample, VehicleMotionDetector};
pub use speed::{
    Rejection, SpeedFilter, SpeedHistory, SpeedReading, MPS_TO_MPH, SPEED_HISTORY_CAPACITY,
};

/// Anything the host's sensor callbacks can deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorReading {
    Speed(SpeedReading),
    Motion(AccelSample),
    /// The platform reported a read failure; logged and dropped.
    Failure(String),
}
