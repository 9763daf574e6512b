//! # Macro Recorder
//!
//! Records keyboard press/release sequences with their timing into one of
//! three slots and replays them later with configurable speed and repetition.
//!
//! ## Features
//!
//! - Three fixed macro slots persisted as a JSON array, rewritten atomically
//! - Hold durations measured per key while recording
//! - Replay pacing from recorded durations, or per-key-class default delays
//! - Repetition count, per-run setting overrides and cancellation
//! - Import of the old flat text macro file
//! - Native hook/injection via `rdev` behind the `native-input` feature
//!
//! ## Example
//!
//! ```no_run
//! use macro_recorder::capability::Unavailable;
//! use macro_recorder::{MacroEngine, SlotStore};
//! use std::sync::Arc;
//!
//! # async fn demo() -> macro_recorder::Result<()> {
//! let engine = MacroEngine::new(
//!     SlotStore::new("recorded_keys.json"),
//!     Arc::new(Unavailable),
//!     Arc::new(Unavailable),
//! );
//!
//! // Start recording into slot 0, then stop and save
//! engine.toggle_recording(0).await?;
//! engine.toggle_recording(0).await?;
//!
//! // Replay it
//! let outcome = engine.play(0)?.wait().await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Slot file
//!
//! ```json
//! [
//!   { "events": [ { "key": "'a'", "action": "press" },
//!                 { "key": "'a'", "action": "release", "duration": 0.083 } ],
//!     "settings": { "repetitions": 2, "regular_delay": 0.01, "alt_tab_delay": 0.3 } },
//!   {},
//!   {}
//! ]
//! ```

#[cfg(feature = "native-input")]
pub mod backend;
pub mod capability;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod keys;
pub mod legacy;
pub mod settings;
pub mod store;

pub use config::AppConfig;
pub use engine::{
    EngineState, MacroEngine, PlaybackCancel, PlaybackHandle, PlaybackOutcome, UnsavedRecording,
};
pub use error::{MacroError, Result};
pub use event::{EventLog, KeyAction, KeyEvent};
pub use keys::{KeyHandle, KeyName, SpecialKey};
pub use settings::{Settings, SettingsSnapshot};
pub use store::{Slot, SlotStore, SLOT_COUNT};
