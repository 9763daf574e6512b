//! Recorded key events and the in-memory log of a recording session.

use crate::keys::KeyName;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAction {
    Press,
    Release,
}

impl fmt::Display for KeyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Press => f.write_str("press"),
            Self::Release => f.write_str("release"),
        }
    }
}

/// A single press or release, as stored in a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub key: KeyName,
    pub action: KeyAction,
    /// Seconds the key was held, only on a release that followed its press.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl KeyEvent {
    pub fn press(key: impl Into<KeyName>) -> Self {
        Self {
            key: key.into(),
            action: KeyAction::Press,
            duration: None,
        }
    }

    pub fn release(key: impl Into<KeyName>, duration: Option<f64>) -> Self {
        Self {
            key: key.into(),
            action: KeyAction::Release,
            duration,
        }
    }
}

/// Accumulates events while a recording session is active.
///
/// Press times are tracked per key, so overlapping holds (A down, B down,
/// A up) still measure A's hold from A's own press.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<KeyEvent>,
    pending: HashMap<KeyName, Instant>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for a new session.
    pub fn start(&mut self) {
        self.events.clear();
        self.pending.clear();
    }

    pub fn record(&mut self, key: KeyName, action: KeyAction, at: Instant) {
        let event = match action {
            KeyAction::Press => {
                self.pending.insert(key.clone(), at);
                KeyEvent::press(key)
            }
            KeyAction::Release => {
                let duration = self
                    .pending
                    .remove(&key)
                    .map(|pressed| round_millis(at.saturating_duration_since(pressed).as_secs_f64()));
                KeyEvent::release(key, duration)
            }
        };

        debug!(key = %event.key, action = %event.action, duration = ?event.duration, "captured key event");
        self.events.push(event);
    }

    /// Copy of everything logged so far; the log itself is left intact.
    pub fn drain(&self) -> Vec<KeyEvent> {
        self.events.clone()
    }

    pub fn events(&self) -> &[KeyEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

fn round_millis(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}
