use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::trip::Coordinate;

/// Metres per second to miles per hour.
pub const MPS_TO_MPH: f64 = 2.23694;

/// Number of filtered samples kept for scoring.
pub const SPEED_HISTORY_CAPACITY: usize = 100;

/// One raw fix from the platform location stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedReading {
    /// Speed magnitude in m/s. Platforms report negative values when the
    /// speed is unknown; those are clamped to zero.
    pub speed_mps: f64,
    pub coordinate: Option<Coordinate>,
    /// Platform timestamp of the fix, when the host has one.
    pub recorded_at: Option<DateTime<Utc>>,
}

impl SpeedReading {
    pub fn new(speed_mps: f64) -> Self {
        Self {
            speed_mps,
            coordinate: None,
            recorded_at: None,
        }
    }

    pub fn from_mph(speed_mph: f64) -> Self {
        Self::new(speed_mph / MPS_TO_MPH)
    }

    pub fn with_coordinate(mut self, coordinate: Coordinate) -> Self {
        self.coordinate = Some(coordinate);
        self
    }

    pub fn recorded_at(mut self, at: DateTime<Utc>) -> Self {
        self.recorded_at = Some(at);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    NonFinite,
    /// Host timestamp did not move forward.
    OutOfOrder {
        last: DateTime<Utc>,
        received: DateTime<Utc>,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NonFinite => write!(f, "speed is not a finite number"),
            Rejection::OutOfOrder { last, received } => write!(
                f,
                "timestamp {} is not newer than last accepted {}",
                received.to_rfc3339(),
                last.to_rfc3339()
            ),
        }
    }
}

/// Validates raw readings and converts them to mph.
#[derive(Debug, Default, Clone)]
pub struct SpeedFilter {
    last_recorded_at: Option<DateTime<Utc>>,
}

impl SpeedFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the filtered speed in mph, or why the reading was dropped.
    pub fn accept(&mut self, reading: &SpeedReading) -> Result<f64, Rejection> {
        if !reading.speed_mps.is_finite() {
            return Err(Rejection::NonFinite);
        }

        if let Some(received) = reading.recorded_at {
            if let Some(last) = self.last_recorded_at {
                if received <= last {
                    return Err(Rejection::OutOfOrder { last, received });
                }
            }
            self.last_recorded_at = Some(received);
        }

        Ok(reading.speed_mps.max(0.0) * MPS_TO_MPH)
    }
}

/// Bounded FIFO of recent filtered speeds (mph), oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedHistory {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl SpeedHistory {
    pub fn new() -> Self {
        Self::with_capacity(SPEED_HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Rebuilds a history from a persisted snapshot, keeping the newest entries.
    pub fn from_samples(samples: &[f64]) -> Self {
        let mut history = Self::new();
        for &sample in samples {
            history.push(sample);
        }
        history
    }

    pub fn push(&mut self, speed_mph: f64) {
        self.samples.push_back(speed_mph);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn max(&self) -> f64 {
        self.samples.iter().copied().fold(0.0, f64::max)
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }
}

impl Default for SpeedHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn negative_speed_is_clamped_to_zero() {
        let mut filter = SpeedFilter::new();
        let mph = filter.accept(&SpeedReading::new(-1.0)).unwrap();
        assert_eq!(mph, 0.0);
    }

    #[test]
    fn converts_metres_per_second_to_mph() {
        let mut filter = SpeedFilter::new();
        let mph = filter.accept(&SpeedReading::new(10.0)).unwrap();
        assert!((mph - 22.3694).abs() < 1e-9);
    }

    #[test]
    fn rejects_non_finite_speed() {
        let mut filter = SpeedFilter::new();
        assert_eq!(
            filter.accept(&SpeedReading::new(f64::NAN)),
            Err(Rejection::NonFinite)
        );
    }

    #[test]
    fn rejects_duplicate_and_out_of_order_timestamps() {
        let mut filter = SpeedFilter::new();
        let t0 = Utc::now();

        assert!(filter.accept(&SpeedReading::new(5.0).recorded_at(t0)).is_ok());
        assert!(filter.accept(&SpeedReading::new(5.0).recorded_at(t0)).is_err());
        assert!(filter
            .accept(&SpeedReading::new(5.0).recorded_at(t0 - Duration::seconds(1)))
            .is_err());
        assert!(filter
            .accept(&SpeedReading::new(5.0).recorded_at(t0 + Duration::seconds(1)))
            .is_ok());
        // Untimed readings are always taken.
        assert!(filter.accept(&SpeedReading::new(5.0)).is_ok());
    }

    #[test]
    fn history_keeps_last_hundred_in_order() {
        let mut history = SpeedHistory::new();
        for i in 0..150 {
            history.push(i as f64);
        }

        assert_eq!(history.len(), 100);
        let samples = history.to_vec();
        assert_eq!(samples.first().copied(), Some(50.0));
        assert_eq!(samples.last().copied(), Some(149.0));
        assert!(samples.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn empty_history_max_is_zero() {
        assert_eq!(SpeedHistory::new().max(), 0.0);
    }

    #[test]
    fn from_samples_truncates_to_newest() {
        let samples: Vec<f64> = (0..120).map(|i| i as f64).collect();
        let history = SpeedHistory::from_samples(&samples);
        assert_eq!(history.len(), 100);
        assert_eq!(history.to_vec()[0], 20.0);
    }
}
