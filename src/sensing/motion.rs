use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::trip::scoring::population_variance;

const MOTION_HISTORY_SIZE: usize = 50;
const MOTION_WINDOW: usize = 10;
/// Summed per-axis variance (g²) below which motion looks like a vehicle.
const VEHICLE_VARIANCE_THRESHOLD: f64 = 0.3;

/// Accelerometer sample in g.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccelSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AccelSample {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Flags smooth, low-variance acceleration typical of riding in a car as
/// opposed to the jolts of walking. Purely advisory.
#[derive(Debug, Clone, Default)]
pub struct VehicleMotionDetector {
    history: VecDeque<AccelSample>,
    vehicle_motion: bool,
}

impl VehicleMotionDetector {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(MOTION_HISTORY_SIZE),
            vehicle_motion: false,
        }
    }

    /// Folds in one sample and returns the updated flag.
    pub fn push(&mut self, sample: AccelSample) -> bool {
        if !sample.is_finite() {
            return self.vehicle_motion;
        }

        self.history.push_back(sample);
        if self.history.len() > MOTION_HISTORY_SIZE {
            self.history.pop_front();
        }

        self.vehicle_motion = self.evaluate();
        self.vehicle_motion
    }

    pub fn is_vehicle_motion(&self) -> bool {
        self.vehicle_motion
    }

    fn evaluate(&self) -> bool {
        if self.history.len() < MOTION_WINDOW {
            return false;
        }

        let recent: Vec<&AccelSample> = self
            .history
            .iter()
            .skip(self.history.len() - MOTION_WINDOW)
            .collect();

        let xs: Vec<f64> = recent.iter().map(|s| s.x).collect();
        let ys: Vec<f64> = recent.iter().map(|s| s.y).collect();
        let zs: Vec<f64> = recent.iter().map(|s| s.z).collect();

        let total = population_variance(&xs) + population_variance(&ys) + population_variance(&zs);
        total < VEHICLE_VARIANCE_THRESHOLD
    }
}
