use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum TripState {
    #[default]
    Idle,
    Detecting,
    InTrip,
    Ending,
}

impl TripState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripState::Idle => "idle",
            TripState::Detecting => "detecting",
            TripState::InTrip => "inTrip",
            TripState::Ending => "ending",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "idle" => Ok(TripState::Idle),
            "detecting" => Ok(TripState::Detecting),
            "inTrip" => Ok(TripState::InTrip),
            "ending" => Ok(TripState::Ending),
            other => Err(anyhow!("unknown trip state '{other}'")),
        }
    }

    /// A trip record exists (in progress or winding down).
    pub fn has_trip(&self) -> bool {
        matches!(self, TripState::InTrip | TripState::Ending)
    }
}

impl fmt::Display for TripState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionThresholds {
    pub speed_threshold_mph: f64,
    pub stop_threshold_mph: f64,
    /// Dwell in `Detecting` before a trip starts.
    pub sustained: Duration,
    /// Dwell in `Ending` before a trip is finalized.
    pub stop_time: Duration,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            speed_threshold_mph: 15.0,
            stop_threshold_mph: 5.0,
            sustained: Duration::from_secs(10),
            stop_time: Duration::from_secs(10),
        }
    }
}

/// Side effect the controller must carry out after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripAction {
    ArmDetection { generation: u64, after: Duration },
    CancelDetection,
    BeginTrip,
    ArmStop { generation: u64, after: Duration },
    ResumeTrip,
    FinishTrip,
}

/// Pure idle → detecting → inTrip → ending cycle.
///
/// Every transition bumps `generation`; a timer armed for an older
/// generation is stale and `on_timer` ignores it.
#[derive(Debug, Clone)]
pub struct TripMachine {
    state: TripState,
    generation: u64,
    entered_at: Option<Instant>,
    thresholds: DetectionThresholds,
}

impl TripMachine {
    pub fn new(thresholds: DetectionThresholds) -> Self {
        Self {
            state: TripState::Idle,
            generation: 0,
            entered_at: None,
            thresholds,
        }
    }

    pub fn state(&self) -> TripState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn thresholds(&self) -> &DetectionThresholds {
        &self.thresholds
    }

    pub fn on_speed(&mut self, speed_mph: f64, now: Instant) -> Option<TripAction> {
        let th = self.thresholds;
        match self.state {
            TripState::Idle if speed_mph > th.speed_threshold_mph => {
                self.enter(TripState::Detecting, now);
                Some(TripAction::ArmDetection {
                    generation: self.generation,
                    after: th.sustained,
                })
            }
            TripState::Detecting if speed_mph < th.stop_threshold_mph => {
                self.enter(TripState::Idle, now);
                Some(TripAction::CancelDetection)
            }
            // The detection timer is late (suspended process); the dwell is
            // already satisfied so the reading completes the transition.
            TripState::Detecting if self.dwell_elapsed(now, th.sustained) => {
                self.enter(TripState::InTrip, now);
                Some(TripAction::BeginTrip)
            }
            TripState::InTrip if speed_mph < th.stop_threshold_mph => {
                self.enter(TripState::Ending, now);
                Some(TripAction::ArmStop {
                    generation: self.generation,
                    after: th.stop_time,
                })
            }
            TripState::Ending if speed_mph > th.speed_threshold_mph => {
                self.enter(TripState::InTrip, now);
                Some(TripAction::ResumeTrip)
            }
            TripState::Ending if self.dwell_elapsed(now, th.stop_time) => {
                self.enter(TripState::Idle, now);
                Some(TripAction::FinishTrip)
            }
            _ => None,
        }
    }

    pub fn on_timer(&mut self, generation: u64, now: Instant) -> Option<TripAction> {
        if generation != self.generation {
            return None;
        }

        match self.state {
            TripState::Detecting => {
                self.enter(TripState::InTrip, now);
                Some(TripAction::BeginTrip)
            }
            TripState::Ending => {
                self.enter(TripState::Idle, now);
                Some(TripAction::FinishTrip)
            }
            TripState::Idle | TripState::InTrip => None,
        }
    }

    pub fn start_manual(&mut self, now: Instant) -> Option<TripAction> {
        match self.state {
            TripState::Idle | TripState::Detecting => {
                self.enter(TripState::InTrip, now);
                Some(TripAction::BeginTrip)
            }
            TripState::InTrip | TripState::Ending => None,
        }
    }

    pub fn finish_now(&mut self, now: Instant) -> Option<TripAction> {
        match self.state {
            TripState::InTrip | TripState::Ending => {
                self.enter(TripState::Idle, now);
                Some(TripAction::FinishTrip)
            }
            TripState::Idle | TripState::Detecting => None,
        }
    }

    /// Re-enters a state recovered from a previous process. Only trip states
    /// are meaningful; anything else resets to idle.
    pub fn restore(&mut self, state: TripState, now: Instant) -> Option<TripAction> {
        match state {
            TripState::InTrip => {
                self.enter(TripState::InTrip, now);
                None
            }
            TripState::Ending => {
                self.enter(TripState::Ending, now);
                Some(TripAction::ArmStop {
                    generation: self.generation,
                    after: self.thresholds.stop_time,
                })
            }
            TripState::Idle | TripState::Detecting => {
                self.enter(TripState::Idle, now);
                None
            }
        }
    }

    fn enter(&mut self, state: TripState, now: Instant) {
        self.state = state;
        self.generation = self.generation.wrapping_add(1);
        self.entered_at = Some(now);
    }

    fn dwell_elapsed(&self, now: Instant, dwell: Duration) -> bool {
        self.entered_at
            .map(|entered| now.saturating_duration_since(entered) >= dwell)
            .unwrap_or(false)
    }
}

impl Default for TripMachine {
    fn default() -> Self {
        Self::new(DetectionThresholds::default())
    }
}
