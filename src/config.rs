//! Application configuration.
//!
//! Everything has a default, so a missing or partial config file is fine.
//!
//! ```json
//! {
//!   "store_path": "/home/me/.local/share/macros.json",
//!   "defaults": { "repetitions": 1, "regular_delay": 0.01, "alt_tab_delay": 0.3 },
//!   "capture_buffer": 1024,
//!   "log_filter": "info"
//! }
//! ```

use crate::engine::DEFAULT_CAPTURE_BUFFER;
use crate::error::{MacroError, Result};
use crate::settings::Settings;
use atomic_write_file::AtomicWriteFile;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_NAME: &str = "MacroRecorder";
pub const STORE_FILE_NAME: &str = "recorded_keys.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Slot file; defaults to the platform data directory.
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Settings the engine starts with.
    #[serde(default)]
    pub defaults: Settings,

    #[serde(default = "default_capture_buffer")]
    pub capture_buffer: usize,

    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_capture_buffer() -> usize {
    DEFAULT_CAPTURE_BUFFER
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            defaults: Settings::default(),
            capture_buffer: default_capture_buffer(),
            log_filter: default_log_filter(),
        }
    }
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| MacroError::config_load(path.display().to_string(), e.to_string()))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| MacroError::config_load(path.display().to_string(), e.to_string()))?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let content = serde_json::to_string_pretty(self)?;

        let mut file = AtomicWriteFile::options()
            .open(path)
            .map_err(|e| MacroError::config_save(&shown, e.to_string()))?;
        file.write_all(content.as_bytes())
            .map_err(|e| MacroError::config_save(&shown, e.to_string()))?;
        file.commit()
            .map_err(|e| MacroError::config_save(&shown, e.to_string()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture_buffer == 0 {
            return Err(MacroError::config_validation(
                "capture_buffer must be greater than 0",
            ));
        }
        if self.defaults.repetitions == 0 {
            return Err(MacroError::config_validation(
                "defaults.repetitions must be at least 1",
            ));
        }
        self.defaults.validate()
    }

    /// Where the slot file lives.
    pub fn resolved_store_path(&self) -> Result<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => default_store_path(),
        }
    }
}

/// `<data dir>/MacroRecorder/recorded_keys.json`
pub fn default_store_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", APP_NAME, APP_NAME).ok_or_else(|| {
        MacroError::config_validation("could not determine the user data directory")
    })?;
    Ok(dirs.data_dir().join(STORE_FILE_NAME))
}

/// Parse a delay such as `"10ms"`, `"0.3s"`, `"2m"`; a bare number is milliseconds.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let normalized = value.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(MacroError::invalid_duration(value, "empty value"));
    }

    let (number, scale) = if let Some(n) = normalized.strip_suffix("ms") {
        (n, 0.001)
    } else if let Some(n) = normalized.strip_suffix('s') {
        (n, 1.0)
    } else if let Some(n) = normalized.strip_suffix('m') {
        (n, 60.0)
    } else {
        (normalized.as_str(), 0.001)
    };

    let amount: f64 = number
        .trim()
        .parse()
        .map_err(|_| MacroError::invalid_duration(value, "expected a number with ms, s or m"))?;
    if !amount.is_finite() || amount < 0.0 {
        return Err(MacroError::invalid_duration(value, "must be a non-negative number"));
    }

    Duration::try_from_secs_f64(amount * scale)
        .map_err(|e| MacroError::invalid_duration(value, e.to_string()))
}
