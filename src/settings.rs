//! Playback settings shared by recording and replay.

use crate::error::{MacroError, Result};
use crate::event::KeyEvent;
use crate::keys;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Current playback configuration.
///
/// Delays are seconds, matching the slot file. Range clamping is left to the
/// front-end; [`Settings::validate`] only rejects values that cannot be
/// persisted or slept on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
    #[serde(default = "default_regular_delay")]
    pub regular_delay: f64,
    #[serde(default = "default_alt_tab_delay")]
    pub alt_tab_delay: f64,
}

fn default_repetitions() -> u32 {
    1
}

fn default_regular_delay() -> f64 {
    0.01
}

fn default_alt_tab_delay() -> f64 {
    0.3
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repetitions: default_repetitions(),
            regular_delay: default_regular_delay(),
            alt_tab_delay: default_alt_tab_delay(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        check_delay("regular_delay", self.regular_delay)?;
        check_delay("alt_tab_delay", self.alt_tab_delay)?;
        Ok(())
    }

    /// Override the fields present in `snapshot`, leaving the others alone.
    pub fn apply(&mut self, snapshot: &SettingsSnapshot) {
        if let Some(repetitions) = snapshot.repetitions {
            self.repetitions = repetitions;
        }
        if let Some(regular_delay) = snapshot.regular_delay {
            self.regular_delay = regular_delay;
        }
        if let Some(alt_tab_delay) = snapshot.alt_tab_delay {
            self.alt_tab_delay = alt_tab_delay;
        }
    }

    /// How long replay waits after injecting `event`.
    ///
    /// A recorded hold duration wins; otherwise alt-tab class keys use
    /// `alt_tab_delay` and everything else `regular_delay`.
    pub fn pacing_delay(&self, event: &KeyEvent) -> Duration {
        let seconds = match event.duration {
            Some(recorded) => recorded,
            None if keys::is_alt_tab_class(&event.key) => self.alt_tab_delay,
            None => self.regular_delay,
        };
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO)
    }

    pub fn snapshot(&self) -> SettingsSnapshot {
        SettingsSnapshot {
            repetitions: Some(self.repetitions),
            regular_delay: Some(self.regular_delay),
            alt_tab_delay: Some(self.alt_tab_delay),
        }
    }
}

fn check_delay(field: &str, seconds: f64) -> Result<()> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(MacroError::config_validation(format!(
            "{field} must be a non-negative number of seconds, got {seconds}"
        )));
    }
    Ok(())
}

/// Settings as stored in a slot; any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetitions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regular_delay: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_tab_delay: Option<f64>,
}

impl SettingsSnapshot {
    pub fn is_empty(&self) -> bool {
        self.repetitions.is_none() && self.regular_delay.is_none() && self.alt_tab_delay.is_none()
    }
}

impl From<&Settings> for SettingsSnapshot {
    fn from(settings: &Settings) -> Self {
        settings.snapshot()
    }
}
