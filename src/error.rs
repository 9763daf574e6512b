//! Custom error types for macro-recorder.
//!
//! This module provides structured error types using `thiserror` so that the
//! front-end can tell a bad key name apart from a damaged store or a call
//! made in the wrong recorder state.

use std::io;
use thiserror::Error;

/// Main error type for macro-recorder operations.
#[derive(Error, Debug)]
pub enum MacroError {
    /// A stored or requested key name has no injectable key behind it.
    #[error("unknown key '{key}'")]
    UnknownKey { key: String },

    /// The slot file exists but is not a well-formed slot array.
    #[error("slot store '{path}' is corrupt: {reason}")]
    CorruptStore { path: String, reason: String },

    /// Operation is not allowed in the current recorder state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Slot index outside of the fixed slot range.
    #[error("slot index {index} is out of range (expected 0..{total})")]
    InvalidSlot { index: usize, total: usize },

    /// The key hook or the key injector could not be used.
    #[error("input capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// Error rewriting the slot file.
    #[error("failed to write slot store '{path}': {reason}")]
    StoreWrite { path: String, reason: String },

    /// A line of the old flat macro file could not be understood.
    #[error("legacy macro file, line {line}: {reason}")]
    LegacyFormat { line: usize, reason: String },

    /// Configuration validation error.
    #[error("configuration error: {0}")]
    ConfigValidation(String),

    /// Error reading or parsing configuration file.
    #[error("failed to load config from '{path}': {reason}")]
    ConfigLoad { path: String, reason: String },

    /// Error writing configuration file.
    #[error("failed to save config to '{path}': {reason}")]
    ConfigSave { path: String, reason: String },

    /// Error parsing duration string.
    #[error("invalid duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },

    /// Background task could not be spawned or did not finish cleanly.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for macro-recorder operations.
pub type Result<T> = std::result::Result<T, MacroError>;

impl MacroError {
    /// Create a new UnknownKey error.
    pub fn unknown_key(key: impl Into<String>) -> Self {
        Self::UnknownKey { key: key.into() }
    }

    /// Create a new CorruptStore error.
    pub fn corrupt_store(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptStore {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new InvalidState error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Create a new InvalidSlot error.
    pub fn invalid_slot(index: usize, total: usize) -> Self {
        Self::InvalidSlot { index, total }
    }

    /// Create a new CapabilityUnavailable error.
    pub fn capability(message: impl Into<String>) -> Self {
        Self::CapabilityUnavailable(message.into())
    }

    /// Create a new StoreWrite error.
    pub fn store_write(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StoreWrite {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new LegacyFormat error.
    pub fn legacy_format(line: usize, reason: impl Into<String>) -> Self {
        Self::LegacyFormat {
            line,
            reason: reason.into(),
        }
    }

    /// Create a new ConfigValidation error.
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation(message.into())
    }

    /// Create a new ConfigLoad error.
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new ConfigSave error.
    pub fn config_save(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigSave {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new InvalidDuration error.
    pub fn invalid_duration(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDuration {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a new Runtime error.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }
}
