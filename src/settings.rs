use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::trip::DetectionThresholds;

pub const SETTINGS_FILE: &str = "settings.json";

/// Longest accepted dwell or background interval, in seconds.
pub const MAX_DURATION_SECS: f64 = 86_400.0;

/// Tunables for detection and recovery. Read once at launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TripSettings {
    pub speed_threshold_mph: f64,
    pub stop_threshold_mph: f64,
    pub sustained_secs: f64,
    pub stop_secs: f64,
    pub first_background_check_secs: f64,
    pub background_check_interval_secs: f64,
    pub force_quit_after_secs: f64,
    pub selection_retry_delay_ms: u64,
    pub checkpoint_every_readings: u32,
}

impl Default for TripSettings {
    fn default() -> Self {
        Self {
            speed_threshold_mph: 15.0,
            stop_threshold_mph: 5.0,
            sustained_secs: 10.0,
            stop_secs: 10.0,
            first_background_check_secs: 2.0,
            background_check_interval_secs: 5.0,
            force_quit_after_secs: 30.0,
            selection_retry_delay_ms: 500,
            checkpoint_every_readings: 10,
        }
    }
}

fn debug_mode() -> bool {
    std::env::var("COPILOT_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

impl TripSettings {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("speed_threshold_mph", self.speed_threshold_mph),
            ("stop_threshold_mph", self.stop_threshold_mph),
            ("sustained_secs", self.sustained_secs),
            ("stop_secs", self.stop_secs),
            ("first_background_check_secs", self.first_background_check_secs),
            (
                "background_check_interval_secs",
                self.background_check_interval_secs,
            ),
            ("force_quit_after_secs", self.force_quit_after_secs),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                bail!("{name} must be a positive number, got {value}");
            }
        }

        let durations = [
            ("sustained_secs", self.sustained_secs),
            ("stop_secs", self.stop_secs),
            ("first_background_check_secs", self.first_background_check_secs),
            (
                "background_check_interval_secs",
                self.background_check_interval_secs,
            ),
            ("force_quit_after_secs", self.force_quit_after_secs),
        ];
        for (name, value) in durations {
            if value > MAX_DURATION_SECS {
                bail!("{name} must be at most {MAX_DURATION_SECS} seconds, got {value}");
            }
        }

        if self.stop_threshold_mph >= self.speed_threshold_mph {
            bail!(
                "stop_threshold_mph ({}) must be below speed_threshold_mph ({})",
                self.stop_threshold_mph,
                self.speed_threshold_mph
            );
        }
        if self.checkpoint_every_readings == 0 {
            bail!("checkpoint_every_readings must be at least 1");
        }
        Ok(())
    }

    pub fn thresholds(&self) -> DetectionThresholds {
        DetectionThresholds {
            speed_threshold_mph: self.speed_threshold_mph,
            stop_threshold_mph: self.stop_threshold_mph,
            sustained: Duration::from_secs_f64(self.sustained_secs),
            stop_time: Duration::from_secs_f64(self.stop_secs),
        }
    }

    /// Readings between snapshot checkpoints; 1 under `COPILOT_DEBUG`.
    pub fn checkpoint_interval(&self) -> u32 {
        if debug_mode() {
            1
        } else {
            self.checkpoint_every_readings.max(1)
        }
    }

    pub fn first_background_check(&self) -> Duration {
        Duration::from_secs_f64(self.first_background_check_secs)
    }

    pub fn background_check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.background_check_interval_secs)
    }

    pub fn force_quit_after(&self) -> Duration {
        Duration::from_secs_f64(self.force_quit_after_secs)
    }

    pub fn selection_retry_delay(&self) -> Duration {
        Duration::from_millis(self.selection_retry_delay_ms)
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<TripSettings>,
}

impl SettingsStore {
    /// Loads `path`, falling back to defaults when the file is missing,
    /// malformed or fails validation.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str::<TripSettings>(&contents) {
                Ok(settings) if settings.validate().is_ok() => settings,
                Ok(_) | Err(_) => {
                    log::warn!(
                        "Ignoring invalid settings at {}, using defaults",
                        path.display()
                    );
                    TripSettings::default()
                }
            }
        } else {
            TripSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, TripSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TripSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self) -> TripSettings {
        self.read().clone()
    }

    pub fn update(&self, settings: TripSettings) -> Result<()> {
        settings.validate()?;
        let mut guard = self.write();
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    fn persist(&self, data: &TripSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serialized)
            .with_context(|| format!("Failed to write settings to {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace settings at {}", self.path.display()))
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: TripSettings = serde_json::from_str(&contents)?;
        data.validate()?;
        *self.write() = data;
        Ok(())
    }
}
