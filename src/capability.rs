//! Input capabilities consumed by the engine.
//!
//! The engine never talks to the OS directly. It subscribes to a [`KeyHook`]
//! while recording and drives a [`KeyInjector`] while playing, which keeps
//! the recorder testable without a display server.

use crate::error::{MacroError, Result};
use crate::event::KeyAction;
use crate::keys::KeyHandle;
use std::time::Instant;
use tokio::sync::mpsc;

/// A press or release observed by the hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturedKey {
    pub key: KeyHandle,
    pub action: KeyAction,
    pub at: Instant,
}

impl CapturedKey {
    pub fn now(key: KeyHandle, action: KeyAction) -> Self {
        Self {
            key,
            action,
            at: Instant::now(),
        }
    }
}

/// Identifies one hook subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(pub u64);

/// Global key press/release notifications.
///
/// Implementations deliver events from their own thread into `sink` and must
/// drop the sink on [`KeyHook::unsubscribe`]; the engine relies on the
/// channel closing to know the capture is finished.
pub trait KeyHook: Send + Sync {
    fn subscribe(&self, sink: mpsc::Sender<CapturedKey>) -> Result<HookId>;
    fn unsubscribe(&self, id: HookId) -> Result<()>;
}

/// Synthesizes key events system-wide.
pub trait KeyInjector: Send + Sync {
    fn press(&self, key: &KeyHandle) -> Result<()>;
    fn release(&self, key: &KeyHandle) -> Result<()>;
}

/// Stand-in used when no native input backend is compiled in.
#[derive(Debug, Clone, Default)]
pub struct Unavailable;

const UNAVAILABLE: &str = "built without a native input backend (enable the `native-input` feature)";

impl KeyHook for Unavailable {
    fn subscribe(&self, _sink: mpsc::Sender<CapturedKey>) -> Result<HookId> {
        Err(MacroError::capability(UNAVAILABLE))
    }

    fn unsubscribe(&self, _id: HookId) -> Result<()> {
        Ok(())
    }
}

impl KeyInjector for Unavailable {
    fn press(&self, _key: &KeyHandle) -> Result<()> {
        Err(MacroError::capability(UNAVAILABLE))
    }

    fn release(&self, _key: &KeyHandle) -> Result<()> {
        Err(MacroError::capability(UNAVAILABLE))
    }
}
