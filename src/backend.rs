//! Native key hook and key injection through `rdev`.
//!
//! `rdev::listen` blocks its thread for the life of the process and cannot be
//! stopped, so a single listener thread is started on the first subscription
//! and events are fanned out to whichever sinks are registered at the time.
//! Unsubscribing just removes the sink. If the listener ever exits, every sink
//! is closed and later subscriptions fail.

use crate::capability::{CapturedKey, HookId, KeyHook, KeyInjector};
use crate::error::{MacroError, Result};
use crate::event::KeyAction;
use crate::keys::{KeyHandle, SpecialKey};
use parking_lot::Mutex;
use rdev::{EventType, Key};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// How long to wait for `rdev::listen` to fail before assuming it is up.
const STARTUP_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
enum ListenerState {
    NotStarted,
    Running,
    Failed(String),
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    sinks: Vec<(HookId, mpsc::Sender<CapturedKey>)>,
}

/// Global keyboard hook backed by `rdev::listen`.
pub struct RdevHook {
    registry: Arc<Mutex<Registry>>,
    listener: Arc<Mutex<ListenerState>>,
}

impl Default for RdevHook {
    fn default() -> Self {
        Self::new()
    }
}

impl RdevHook {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            listener: Arc::new(Mutex::new(ListenerState::NotStarted)),
        }
    }

    fn ensure_listener(&self) -> Result<()> {
        let mut listener = self.listener.lock();
        match &*listener {
            ListenerState::Running => return Ok(()),
            ListenerState::Failed(reason) => return Err(MacroError::capability(reason.clone())),
            ListenerState::NotStarted => {}
        }

        let (failure_tx, failure_rx) = std_mpsc::channel::<String>();
        let registry = Arc::clone(&self.registry);
        let state = Arc::clone(&self.listener);

        thread::Builder::new()
            .name("key-hook".to_string())
            .spawn(move || {
                let dispatch_to = Arc::clone(&registry);
                let result = rdev::listen(move |event| dispatch(&dispatch_to, event));
                let reason = match result {
                    Ok(()) => "key hook listener exited".to_string(),
                    Err(e) => format!("key hook failed: {e:?}"),
                };
                error!("{reason}");
                // Nobody is waiting once the startup grace has passed
                let _ = failure_tx.send(reason.clone());
                listener_exited(&state, &registry, reason);
            })
            .map_err(|e| MacroError::capability(format!("failed to start key hook thread: {e}")))?;

        let started = match failure_rx.recv_timeout(STARTUP_GRACE) {
            Err(std_mpsc::RecvTimeoutError::Timeout) => Ok(()),
            Ok(reason) => Err(reason),
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                Err("key hook listener exited".to_string())
            }
        };

        match started {
            Ok(()) => {
                *listener = ListenerState::Running;
                info!("global key hook started");
                Ok(())
            }
            Err(reason) => {
                *listener = ListenerState::Failed(reason.clone());
                Err(MacroError::capability(reason))
            }
        }
    }
}

/// Mark the hook dead and close every sink so running collectors finish.
fn listener_exited(state: &Mutex<ListenerState>, registry: &Mutex<Registry>, reason: String) {
    *state.lock() = ListenerState::Failed(reason);
    let closed = std::mem::take(&mut registry.lock().sinks);
    if !closed.is_empty() {
        warn!(subscribers = closed.len(), "key hook lost while recording");
    }
}

impl KeyHook for RdevHook {
    fn subscribe(&self, sink: mpsc::Sender<CapturedKey>) -> Result<HookId> {
        self.ensure_listener()?;

        let mut registry = self.registry.lock();
        // Sinks of abandoned subscriptions
        registry.sinks.retain(|(_, sink)| !sink.is_closed());
        registry.next_id += 1;
        let id = HookId(registry.next_id);
        registry.sinks.push((id, sink));
        debug!(hook = id.0, "key hook subscribed");
        Ok(id)
    }

    fn unsubscribe(&self, id: HookId) -> Result<()> {
        self.registry.lock().sinks.retain(|(sink_id, _)| *sink_id != id);
        debug!(hook = id.0, "key hook unsubscribed");
        Ok(())
    }
}

fn dispatch(registry: &Mutex<Registry>, event: rdev::Event) {
    let (key, action) = match event.event_type {
        EventType::KeyPress(key) => (key, KeyAction::Press),
        EventType::KeyRelease(key) => (key, KeyAction::Release),
        _ => return,
    };

    let captured = CapturedKey::now(handle_from_native(key), action);
    let registry = registry.lock();
    for (id, sink) in &registry.sinks {
        if let Err(e) = sink.try_send(captured) {
            warn!(hook = id.0, "dropped captured key: {e}");
        }
    }
}

/// Key injection through `rdev::simulate`.
#[derive(Debug, Clone, Default)]
pub struct RdevInjector;

impl RdevInjector {
    pub fn new() -> Self {
        Self
    }

    fn simulate(&self, event: EventType) -> Result<()> {
        rdev::simulate(&event)
            .map_err(|e| MacroError::capability(format!("OS rejected synthetic {event:?}: {e:?}")))
    }
}

impl KeyInjector for RdevInjector {
    fn press(&self, key: &KeyHandle) -> Result<()> {
        self.simulate(EventType::KeyPress(native_key(key)?))
    }

    fn release(&self, key: &KeyHandle) -> Result<()> {
        self.simulate(EventType::KeyRelease(native_key(key)?))
    }
}

fn native_key(handle: &KeyHandle) -> Result<Key> {
    native_from_handle(handle)
        .ok_or_else(|| MacroError::capability(format!("no native key for {handle}")))
}

/// Map a native key to a handle.
///
/// Characters are derived from the physical key on a US layout, so shifted
/// symbols are captured as their base key plus the shift events around them.
pub fn handle_from_native(key: Key) -> KeyHandle {
    use SpecialKey as S;

    let special = match key {
        Key::Alt => S::Alt,
        Key::AltGr => S::AltR,
        Key::ShiftLeft => S::Shift,
        Key::ShiftRight => S::ShiftR,
        Key::ControlLeft => S::Ctrl,
        Key::ControlRight => S::CtrlR,
        Key::MetaLeft => S::Cmd,
        Key::MetaRight => S::CmdR,
        Key::Tab => S::Tab,
        Key::Return | Key::KpReturn => S::Enter,
        Key::Escape => S::Esc,
        Key::Space => S::Space,
        Key::Backspace => S::Backspace,
        Key::Delete | Key::KpDelete => S::Delete,
        Key::Insert => S::Insert,
        Key::UpArrow => S::Up,
        Key::DownArrow => S::Down,
        Key::LeftArrow => S::Left,
        Key::RightArrow => S::Right,
        Key::PageUp => S::PageUp,
        Key::PageDown => S::PageDown,
        Key::Home => S::Home,
        Key::End => S::End,
        Key::F1 => S::F1,
        Key::F2 => S::F2,
        Key::F3 => S::F3,
        Key::F4 => S::F4,
        Key::F5 => S::F5,
        Key::F6 => S::F6,
        Key::F7 => S::F7,
        Key::F8 => S::F8,
        Key::F9 => S::F9,
        Key::F10 => S::F10,
        Key::F11 => S::F11,
        Key::F12 => S::F12,
        Key::CapsLock => S::CapsLock,
        Key::NumLock => S::NumLock,
        Key::ScrollLock => S::ScrollLock,
        Key::PrintScreen => S::PrintScreen,
        Key::Unknown(code) => return KeyHandle::Raw(code),
        other => {
            return match char_from_native(other) {
                Some(c) => KeyHandle::Char(c),
                None => KeyHandle::Raw(0),
            }
        }
    };

    KeyHandle::Special(special)
}

/// Map a handle to the native key that produces it.
pub fn native_from_handle(handle: &KeyHandle) -> Option<Key> {
    use SpecialKey as S;

    let special = match handle {
        KeyHandle::Special(special) => *special,
        KeyHandle::Char(c) => return native_from_char(c.to_ascii_lowercase()),
        KeyHandle::Raw(0) => return None,
        KeyHandle::Raw(code) => return Some(Key::Unknown(*code)),
    };

    let key = match special {
        S::Alt | S::AltL => Key::Alt,
        S::AltR => Key::AltGr,
        S::Shift | S::ShiftL => Key::ShiftLeft,
        S::ShiftR => Key::ShiftRight,
        S::Ctrl | S::CtrlL => Key::ControlLeft,
        S::CtrlR => Key::ControlRight,
        S::Cmd | S::CmdL => Key::MetaLeft,
        S::CmdR => Key::MetaRight,
        S::Tab => Key::Tab,
        S::Enter => Key::Return,
        S::Esc => Key::Escape,
        S::Space => Key::Space,
        S::Backspace => Key::Backspace,
        S::Delete => Key::Delete,
        S::Insert => Key::Insert,
        S::Up => Key::UpArrow,
        S::Down => Key::DownArrow,
        S::Left => Key::LeftArrow,
        S::Right => Key::RightArrow,
        S::PageUp => Key::PageUp,
        S::PageDown => Key::PageDown,
        S::Home => Key::Home,
        S::End => Key::End,
        S::F1 => Key::F1,
        S::F2 => Key::F2,
        S::F3 => Key::F3,
        S::F4 => Key::F4,
        S::F5 => Key::F5,
        S::F6 => Key::F6,
        S::F7 => Key::F7,
        S::F8 => Key::F8,
        S::F9 => Key::F9,
        S::F10 => Key::F10,
        S::F11 => Key::F11,
        S::F12 => Key::F12,
        S::CapsLock => Key::CapsLock,
        S::NumLock => Key::NumLock,
        S::ScrollLock => Key::ScrollLock,
        S::PrintScreen => Key::PrintScreen,
    };

    Some(key)
}

fn char_from_native(key: Key) -> Option<char> {
    let c = match key {
        // Letters
        Key::KeyA => 'a',
        Key::KeyB => 'b',
        Key::KeyC => 'c',
        Key::KeyD => 'd',
        Key::KeyE => 'e',
        Key::KeyF => 'f',
        Key::KeyG => 'g',
        Key::KeyH => 'h',
        Key::KeyI => 'i',
        Key::KeyJ => 'j',
        Key::KeyK => 'k',
        Key::KeyL => 'l',
        Key::KeyM => 'm',
        Key::KeyN => 'n',
        Key::KeyO => 'o',
        Key::KeyP => 'p',
        Key::KeyQ => 'q',
        Key::KeyR => 'r',
        Key::KeyS => 's',
        Key::KeyT => 't',
        Key::KeyU => 'u',
        Key::KeyV => 'v',
        Key::KeyW => 'w',
        Key::KeyX => 'x',
        Key::KeyY => 'y',
        Key::KeyZ => 'z',

        // Numbers, including the keypad
        Key::Num0 | Key::Kp0 => '0',
        Key::Num1 | Key::Kp1 => '1',
        Key::Num2 | Key::Kp2 => '2',
        Key::Num3 | Key::Kp3 => '3',
        Key::Num4 | Key::Kp4 => '4',
        Key::Num5 | Key::Kp5 => '5',
        Key::Num6 | Key::Kp6 => '6',
        Key::Num7 | Key::Kp7 => '7',
        Key::Num8 | Key::Kp8 => '8',
        Key::Num9 | Key::Kp9 => '9',

        // Punctuation
        Key::BackQuote => '`',
        Key::Minus | Key::KpMinus => '-',
        Key::Equal => '=',
        Key::KpPlus => '+',
        Key::KpMultiply => '*',
        Key::KpDivide | Key::Slash => '/',
        Key::LeftBracket => '[',
        Key::RightBracket => ']',
        Key::SemiColon => ';',
        Key::Quote => '\'',
        Key::BackSlash => '\\',
        Key::Comma => ',',
        Key::Dot => '.',

        _ => return None,
    };

    Some(c)
}

fn native_from_char(c: char) -> Option<Key> {
    let key = match c {
        'a' => Key::KeyA,
        'b' => Key::KeyB,
        'c' => Key::KeyC,
        'd' => Key::KeyD,
        'e' => Key::KeyE,
        'f' => Key::KeyF,
        'g' => Key::KeyG,
        'h' => Key::KeyH,
        'i' => Key::KeyI,
        'j' => Key::KeyJ,
        'k' => Key::KeyK,
        'l' => Key::KeyL,
        'm' => Key::KeyM,
        'n' => Key::KeyN,
        'o' => Key::KeyO,
        'p' => Key::KeyP,
        'q' => Key::KeyQ,
        'r' => Key::KeyR,
        's' => Key::KeyS,
        't' => Key::KeyT,
        'u' => Key::KeyU,
        'v' => Key::KeyV,
        'w' => Key::KeyW,
        'x' => Key::KeyX,
        'y' => Key::KeyY,
        'z' => Key::KeyZ,
        '0' => Key::Num0,
        '1' => Key::Num1,
        '2' => Key::Num2,
        '3' => Key::Num3,
        '4' => Key::Num4,
        '5' => Key::Num5,
        '6' => Key::Num6,
        '7' => Key::Num7,
        '8' => Key::Num8,
        '9' => Key::Num9,
        '`' => Key::BackQuote,
        '-' => Key::Minus,
        '=' => Key::Equal,
        '+' => Key::KpPlus,
        '*' => Key::KpMultiply,
        '/' => Key::Slash,
        '[' => Key::LeftBracket,
        ']' => Key::RightBracket,
        ';' => Key::SemiColon,
        '\'' => Key::Quote,
        '\\' => Key::BackSlash,
        ',' => Key::Comma,
        '.' => Key::Dot,
        ' ' => Key::Space,
        _ => return None,
    };

    Some(key)
}
