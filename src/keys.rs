//! Key naming and resolution.
//!
//! Macros are stored with string key names so the slot file does not depend
//! on the OS or on the input library. A name is either one of the fixed
//! special-key identifiers (`Key.tab`, `Key.f5`, ...) or a single printed
//! character wrapped in single quotes (`'a'`).

use crate::error::{MacroError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical string identifier of a key, as written to the slot file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyName(String);

impl KeyName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for KeyName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Non-printable keys that have a fixed canonical name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialKey {
    Alt,
    AltL,
    AltR,
    Tab,
    Shift,
    ShiftL,
    ShiftR,
    Ctrl,
    CtrlL,
    CtrlR,
    Cmd,
    CmdL,
    CmdR,
    Enter,
    Esc,
    Space,
    Backspace,
    Delete,
    Up,
    Down,
    Left,
    Right,
    PageUp,
    PageDown,
    Home,
    End,
    Insert,
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
    CapsLock,
    NumLock,
    ScrollLock,
    PrintScreen,
}

impl SpecialKey {
    /// Every special key, in table order.
    pub const ALL: [SpecialKey; 43] = [
        Self::Alt,
        Self::AltL,
        Self::AltR,
        Self::Tab,
        Self::Shift,
        Self::ShiftL,
        Self::ShiftR,
        Self::Ctrl,
        Self::CtrlL,
        Self::CtrlR,
        Self::Cmd,
        Self::CmdL,
        Self::CmdR,
        Self::Enter,
        Self::Esc,
        Self::Space,
        Self::Backspace,
        Self::Delete,
        Self::Up,
        Self::Down,
        Self::Left,
        Self::Right,
        Self::PageUp,
        Self::PageDown,
        Self::Home,
        Self::End,
        Self::Insert,
        Self::F1,
        Self::F2,
        Self::F3,
        Self::F4,
        Self::F5,
        Self::F6,
        Self::F7,
        Self::F8,
        Self::F9,
        Self::F10,
        Self::F11,
        Self::F12,
        Self::CapsLock,
        Self::NumLock,
        Self::ScrollLock,
        Self::PrintScreen,
    ];

    /// The canonical `Key.<id>` name.
    pub fn name(self) -> &'static str {
        match self {
            // Modifiers
            Self::Alt => "Key.alt",
            Self::AltL => "Key.alt_l",
            Self::AltR => "Key.alt_r",
            Self::Shift => "Key.shift",
            Self::ShiftL => "Key.shift_l",
            Self::ShiftR => "Key.shift_r",
            Self::Ctrl => "Key.ctrl",
            Self::CtrlL => "Key.ctrl_l",
            Self::CtrlR => "Key.ctrl_r",
            Self::Cmd => "Key.cmd",
            Self::CmdL => "Key.cmd_l",
            Self::CmdR => "Key.cmd_r",

            // Editing
            Self::Tab => "Key.tab",
            Self::Enter => "Key.enter",
            Self::Esc => "Key.esc",
            Self::Space => "Key.space",
            Self::Backspace => "Key.backspace",
            Self::Delete => "Key.delete",
            Self::Insert => "Key.insert",

            // Navigation
            Self::Up => "Key.up",
            Self::Down => "Key.down",
            Self::Left => "Key.left",
            Self::Right => "Key.right",
            Self::PageUp => "Key.page_up",
            Self::PageDown => "Key.page_down",
            Self::Home => "Key.home",
            Self::End => "Key.end",

            // Function keys
            Self::F1 => "Key.f1",
            Self::F2 => "Key.f2",
            Self::F3 => "Key.f3",
            Self::F4 => "Key.f4",
            Self::F5 => "Key.f5",
            Self::F6 => "Key.f6",
            Self::F7 => "Key.f7",
            Self::F8 => "Key.f8",
            Self::F9 => "Key.f9",
            Self::F10 => "Key.f10",
            Self::F11 => "Key.f11",
            Self::F12 => "Key.f12",

            // Locks
            Self::CapsLock => "Key.caps_lock",
            Self::NumLock => "Key.num_lock",
            Self::ScrollLock => "Key.scroll_lock",
            Self::PrintScreen => "Key.print_screen",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|key| key.name() == name)
    }
}

/// Opaque key handle understood by the injection capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyHandle {
    Special(SpecialKey),
    Char(char),
    /// A key the capture side could only identify by its native code.
    Raw(u32),
}

impl fmt::Display for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(name_of(self).as_str())
    }
}

/// Resolve a stored key name back to an injectable handle.
pub fn resolve(name: &KeyName) -> Result<KeyHandle> {
    let raw = name.as_str();
    if let Some(special) = SpecialKey::from_name(raw) {
        return Ok(KeyHandle::Special(special));
    }

    let mut chars = raw.chars();
    if let (Some('\''), Some(c), Some('\''), None) =
        (chars.next(), chars.next(), chars.next(), chars.next())
    {
        return Ok(KeyHandle::Char(c));
    }

    Err(MacroError::unknown_key(raw))
}

/// Name a captured key handle.
///
/// `Raw` handles get a `<code>` name that [`resolve`] rejects, so such keys
/// can be recorded but fail when the macro is played back.
pub fn name_of(handle: &KeyHandle) -> KeyName {
    match handle {
        KeyHandle::Special(special) => KeyName::from(special.name()),
        KeyHandle::Char(c) => KeyName::new(format!("'{c}'")),
        KeyHandle::Raw(code) => KeyName::new(format!("<{code}>")),
    }
}

/// Keys that pace with the alt-tab delay when no duration was recorded.
pub fn is_alt_tab_class(name: &KeyName) -> bool {
    matches!(name.as_str(), "Key.tab" | "Key.alt")
}
