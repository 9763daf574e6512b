//! Durable storage of the three macro slots.
//!
//! The backing file is a JSON array of exactly [`SLOT_COUNT`] objects,
//! positionally indexed. Every save rewrites the whole array through an
//! atomic temp-file-and-rename so a crash never leaves a half-written file.

use crate::error::{MacroError, Result};
use crate::event::KeyEvent;
use crate::settings::{Settings, SettingsSnapshot};
use atomic_write_file::AtomicWriteFile;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Number of fixed slots.
pub const SLOT_COUNT: usize = 3;

/// One macro slot. A slot without `events` is empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<KeyEvent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<SettingsSnapshot>,
}

impl Slot {
    pub fn new(events: Vec<KeyEvent>, settings: &Settings) -> Self {
        Self {
            events: Some(events),
            settings: Some(settings.snapshot()),
        }
    }

    /// Playable events, or `None` when there is nothing to replay.
    pub fn playable_events(&self) -> Option<&[KeyEvent]> {
        self.events.as_deref().filter(|events| !events.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.playable_events().is_none()
    }
}

/// Check that `index` addresses one of the fixed slots.
pub fn check_index(index: usize) -> Result<()> {
    if index < SLOT_COUNT {
        Ok(())
    } else {
        Err(MacroError::invalid_slot(index, SLOT_COUNT))
    }
}

/// File-backed slot store.
///
/// Loads and saves through one store instance are serialized; the file is not
/// protected against writers in other processes.
#[derive(Debug)]
pub struct SlotStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SlotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read all slots. A missing file yields empty slots and is not created.
    pub fn load(&self) -> Result<[Slot; SLOT_COUNT]> {
        let _guard = self.lock.lock();
        self.read_slots()
    }

    /// Replace slot `index` and rewrite the whole file.
    pub fn save(&self, index: usize, events: Vec<KeyEvent>, settings: &Settings) -> Result<()> {
        check_index(index)?;
        let _guard = self.lock.lock();

        let mut slots = self.read_slots()?;
        let count = events.len();
        slots[index] = Slot::new(events, settings);
        self.write_slots(&slots)?;

        info!(slot = index, events = count, path = %self.path.display(), "saved macro slot");
        Ok(())
    }

    /// Overwrite every slot at once.
    pub fn replace_all(&self, slots: &[Slot; SLOT_COUNT]) -> Result<()> {
        let _guard = self.lock.lock();
        self.write_slots(slots)
    }

    fn read_slots(&self) -> Result<[Slot; SLOT_COUNT]> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Default::default()),
            Err(e) => return Err(e.into()),
        };

        let stored: Vec<Slot> = serde_json::from_str(&content)
            .map_err(|e| MacroError::corrupt_store(self.path.display().to_string(), e.to_string()))?;
        self.check_durations(&stored)?;

        if stored.len() > SLOT_COUNT {
            warn!(
                found = stored.len(),
                path = %self.path.display(),
                "slot store holds extra slots, ignoring them"
            );
        }

        let mut stored = stored.into_iter();
        Ok(std::array::from_fn(|_| stored.next().unwrap_or_default()))
    }

    fn check_durations(&self, slots: &[Slot]) -> Result<()> {
        let negative = slots
            .iter()
            .flat_map(|slot| slot.events.iter().flatten())
            .find(|event| event.duration.is_some_and(|d| d < 0.0));

        match negative {
            Some(event) => Err(MacroError::corrupt_store(
                self.path.display().to_string(),
                format!("negative duration on '{}' {}", event.key, event.action),
            )),
            None => Ok(()),
        }
    }

    fn write_slots(&self, slots: &[Slot; SLOT_COUNT]) -> Result<()> {
        let path = self.path.display().to_string();

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| MacroError::store_write(&path, e.to_string()))?;
        }

        let mut content = serde_json::to_string_pretty(slots)?;
        content.push('\n');

        let mut file = AtomicWriteFile::options()
            .open(&self.path)
            .map_err(|e| MacroError::store_write(&path, format!("open for atomic write: {e}")))?;
        file.write_all(content.as_bytes())
            .map_err(|e| MacroError::store_write(&path, e.to_string()))?;
        file.commit()
            .map_err(|e| MacroError::store_write(&path, format!("commit: {e}")))?;

        Ok(())
    }
}
