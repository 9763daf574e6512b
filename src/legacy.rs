//! Import of the flat text macro file that predates the slot store.
//!
//! The old file looks like this:
//!
//! ```text
//! settings: repetitions=2, regular_delay=0.01, alt_tab_delay=0.3
//! --- Macro Slot 1 ---
//! Key.alt press
//! Key.tab press
//! Key.tab release (0.083s)
//! Key.alt release
//! --- Macro Slot 2 ---
//!
//! --- Macro Slot 3 ---
//! ```
//!
//! The settings header is optional and applies to every slot.

use crate::error::{MacroError, Result};
use crate::event::KeyEvent;
use crate::settings::SettingsSnapshot;
use crate::store::{Slot, SlotStore, SLOT_COUNT};
use std::fs;
use std::path::Path;
use tracing::info;

const SETTINGS_PREFIX: &str = "settings:";
const SLOT_HEADER_PREFIX: &str = "--- Macro Slot";

/// Parse the old text format into slots.
pub fn parse(content: &str) -> Result<[Slot; SLOT_COUNT]> {
    let mut header: Option<SettingsSnapshot> = None;
    let mut blocks: [Option<Vec<KeyEvent>>; SLOT_COUNT] = Default::default();
    let mut current: Option<usize> = None;

    for (number, raw_line) in content.lines().enumerate() {
        let line_no = number + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix(SETTINGS_PREFIX) {
            header = Some(parse_settings(rest, line_no)?);
            continue;
        }

        if let Some(rest) = line.strip_prefix(SLOT_HEADER_PREFIX) {
            let index = parse_slot_header(rest, line_no)?;
            current = Some(index);
            continue;
        }

        let index = current
            .ok_or_else(|| MacroError::legacy_format(line_no, "event outside of a macro slot"))?;
        blocks[index]
            .get_or_insert_with(Vec::new)
            .push(parse_event(line, line_no)?);
    }

    Ok(blocks.map(|events| match events {
        Some(events) => Slot {
            events: Some(events),
            settings: header.clone(),
        },
        None => Slot::default(),
    }))
}

/// Import the old file at `legacy_path` into `store`.
///
/// Refuses to touch an existing slot store unless `overwrite` is set.
/// Returns the number of slots that received events.
pub fn import(legacy_path: &Path, store: &SlotStore, overwrite: bool) -> Result<usize> {
    if store.exists() && !overwrite {
        return Err(MacroError::invalid_state(format!(
            "slot store '{}' already exists",
            store.path().display()
        )));
    }

    let content = fs::read_to_string(legacy_path)?;
    let slots = parse(&content)?;
    let filled = slots.iter().filter(|slot| !slot.is_empty()).count();

    store.replace_all(&slots)?;
    info!(
        from = %legacy_path.display(),
        to = %store.path().display(),
        slots = filled,
        "imported legacy macro file"
    );
    Ok(filled)
}

fn parse_settings(rest: &str, line_no: usize) -> Result<SettingsSnapshot> {
    let mut snapshot = SettingsSnapshot::default();

    for part in rest.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| MacroError::legacy_format(line_no, format!("bad setting '{part}'")))?;
        let value = value.trim();

        match key.trim() {
            // Old files may carry the count as "2.0"
            "repetitions" => {
                let count: f64 = parse_number(value, line_no)?;
                if count < 1.0 || count.fract() != 0.0 {
                    return Err(MacroError::legacy_format(
                        line_no,
                        format!("bad repetitions '{value}'"),
                    ));
                }
                snapshot.repetitions = Some(count as u32);
            }
            "regular_delay" => snapshot.regular_delay = Some(parse_number(value, line_no)?),
            "alt_tab_delay" => snapshot.alt_tab_delay = Some(parse_number(value, line_no)?),
            _ => {}
        }
    }

    Ok(snapshot)
}

fn parse_number(value: &str, line_no: usize) -> Result<f64> {
    value
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n >= 0.0)
        .ok_or_else(|| MacroError::legacy_format(line_no, format!("bad number '{value}'")))
}

fn parse_slot_header(rest: &str, line_no: usize) -> Result<usize> {
    let number = rest.trim().trim_end_matches('-').trim();
    match number.parse::<usize>() {
        Ok(n) if (1..=SLOT_COUNT).contains(&n) => Ok(n - 1),
        _ => Err(MacroError::legacy_format(
            line_no,
            format!("bad slot header number '{number}'"),
        )),
    }
}

/// Parses `<key> press`, `<key> release` and `<key> release (0.083s)`.
///
/// Fields are split from the right since a key literal may contain a space.
fn parse_event(line: &str, line_no: usize) -> Result<KeyEvent> {
    let (head, duration) = match line.rsplit_once(' ') {
        Some((head, raw)) if raw.starts_with('(') => {
            (head, Some(parse_duration_suffix(raw, line_no)?))
        }
        _ => (line, None),
    };
    let (key, action) = head
        .rsplit_once(' ')
        .ok_or_else(|| MacroError::legacy_format(line_no, format!("missing action in '{line}'")))?;

    match action {
        "press" => Ok(KeyEvent::press(key)),
        "release" => Ok(KeyEvent::release(key, duration)),
        other => Err(MacroError::legacy_format(
            line_no,
            format!("unknown action '{other}'"),
        )),
    }
}

/// Parses `(0.083s)`.
fn parse_duration_suffix(raw: &str, line_no: usize) -> Result<f64> {
    let inner = raw
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix("s)"))
        .ok_or_else(|| MacroError::legacy_format(line_no, format!("bad duration '{raw}'")))?;
    parse_number(inner, line_no)
}
