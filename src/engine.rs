//! Recorder/player state machine.
//!
//! The engine is either idle, recording into a slot, or playing a slot back.
//! Recording feeds hook events through a bounded channel into an
//! [`EventLog`] owned by a single collector task; stopping unsubscribes the
//! hook, waits for the collector to drain the channel and persists the log,
//! keeping it in memory if the save fails.
//! Playback runs as its own task so callers never block on it.

use crate::capability::{CapturedKey, HookId, KeyHook, KeyInjector};
use crate::error::{MacroError, Result};
use crate::event::{EventLog, KeyAction, KeyEvent};
use crate::keys::{self, KeyHandle};
use crate::settings::{Settings, SettingsSnapshot};
use crate::store::{self, Slot, SlotStore, SLOT_COUNT};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default capacity of the hook-to-engine channel.
pub const DEFAULT_CAPTURE_BUFFER: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Recording { slot: usize },
    Playing { slot: usize },
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Recording { slot } => write!(f, "recording slot {}", slot + 1),
            Self::Playing { slot } => write!(f, "playing slot {}", slot + 1),
        }
    }
}

/// How a playback run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed { repetitions: u32, injected: usize },
    /// The slot had no events; nothing was injected.
    EmptySlot,
    Cancelled { injected: usize },
}

struct RecordingSession {
    slot: usize,
    hook_id: HookId,
    collector: JoinHandle<EventLog>,
}

/// A recording whose save failed; kept until it is saved or taken.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsavedRecording {
    pub slot: usize,
    pub events: Vec<KeyEvent>,
}

struct Control {
    state: EngineState,
    session: Option<RecordingSession>,
    unsaved: Option<UnsavedRecording>,
}

struct Shared {
    store: SlotStore,
    hook: Arc<dyn KeyHook>,
    injector: Arc<dyn KeyInjector>,
    settings: Mutex<Settings>,
    control: Mutex<Control>,
    state_tx: watch::Sender<EngineState>,
    capture_buffer: AtomicUsize,
}

impl Shared {
    fn transition(&self, control: &mut Control, state: EngineState) {
        control.state = state;
        self.state_tx.send_replace(state);
        info!(state = %state, "engine state changed");
    }

    fn finish(&self) {
        let mut control = self.control.lock();
        if control.state != EngineState::Idle {
            self.transition(&mut control, EngineState::Idle);
        }
    }

    /// Unsubscribe, drain the collector and save. Runs on its own task so a
    /// caller giving up on the stop cannot strand the engine in `Recording`.
    async fn stop_recording(self: Arc<Self>, session: RecordingSession) -> Result<()> {
        let _idle = IdleGuard(Arc::clone(&self));
        let RecordingSession {
            slot,
            hook_id,
            collector,
        } = session;

        if let Err(e) = self.hook.unsubscribe(hook_id) {
            collector.abort();
            return Err(e);
        }

        let log = collector
            .await
            .map_err(|e| MacroError::runtime(format!("event collector failed: {e}")))?;
        let recording = UnsavedRecording {
            slot,
            events: log.drain(),
        };
        self.persist(recording).await
    }

    /// Save `recording`; on failure it is kept for `retry_save`.
    async fn persist(self: Arc<Self>, recording: UnsavedRecording) -> Result<()> {
        let settings = self.settings.lock().clone();
        let (slot, events) = (recording.slot, recording.events.clone());

        let saver = Arc::clone(&self);
        let saved = tokio::task::spawn_blocking(move || saver.store.save(slot, events, &settings))
            .await
            .map_err(|e| MacroError::runtime(format!("slot save task failed: {e}")))
            .and_then(|saved| saved);

        if let Err(e) = &saved {
            warn!(
                slot = slot,
                events = recording.events.len(),
                "recording kept in memory after failed save: {e}"
            );
            self.control.lock().unsaved = Some(recording);
        }
        saved
    }
}

/// Restores `Idle` when a playback run or a recording stop ends, however it
/// ends.
struct IdleGuard(Arc<Shared>);

impl Drop for IdleGuard {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Keyboard macro recorder and player.
///
/// Cheap to clone; clones share the same state. Recording and playback need
/// a Tokio runtime.
#[derive(Clone)]
pub struct MacroEngine {
    shared: Arc<Shared>,
}

impl MacroEngine {
    pub fn new(store: SlotStore, hook: Arc<dyn KeyHook>, injector: Arc<dyn KeyInjector>) -> Self {
        let (state_tx, _) = watch::channel(EngineState::Idle);
        Self {
            shared: Arc::new(Shared {
                store,
                hook,
                injector,
                settings: Mutex::new(Settings::default()),
                control: Mutex::new(Control {
                    state: EngineState::Idle,
                    session: None,
                    unsaved: None,
                }),
                state_tx,
                capture_buffer: AtomicUsize::new(DEFAULT_CAPTURE_BUFFER),
            }),
        }
    }

    /// Seed the current settings.
    pub fn with_settings(self, settings: Settings) -> Self {
        *self.shared.settings.lock() = settings;
        self
    }

    /// Set the hook channel capacity for recordings started from now on.
    /// Shared with every clone of the engine.
    pub fn with_capture_buffer(self, capacity: usize) -> Self {
        self.shared
            .capture_buffer
            .store(capacity.max(1), Ordering::Relaxed);
        self
    }

    pub fn capture_buffer(&self) -> usize {
        self.shared.capture_buffer.load(Ordering::Relaxed)
    }

    pub fn store(&self) -> &SlotStore {
        &self.shared.store
    }

    pub fn load_slots(&self) -> Result<[Slot; SLOT_COUNT]> {
        self.shared.store.load()
    }

    pub fn state(&self) -> EngineState {
        self.shared.control.lock().state
    }

    /// Observe state transitions; the receiver sees `Idle` once a run is done.
    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.shared.state_tx.subscribe()
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state(), EngineState::Recording { .. })
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state(), EngineState::Playing { .. })
    }

    pub fn settings(&self) -> Settings {
        self.shared.settings.lock().clone()
    }

    pub fn set_settings(&self, settings: Settings) {
        *self.shared.settings.lock() = settings;
    }

    pub fn update_settings(&self, update: impl FnOnce(&mut Settings)) {
        update(&mut *self.shared.settings.lock());
    }

    /// Start recording into `slot`, or stop the running recording and save it.
    ///
    /// Returns the new recording state. When stopping, the log goes to the
    /// slot the recording was started for; `slot` is ignored. If the save
    /// fails the events are kept, see [`MacroEngine::retry_save`].
    pub async fn toggle_recording(&self, slot: usize) -> Result<bool> {
        let session = {
            let mut control = self.shared.control.lock();
            let state = control.state;
            match state {
                EngineState::Playing { .. } => {
                    return Err(MacroError::invalid_state(
                        "cannot record while a playback is running",
                    ))
                }
                EngineState::Idle => None,
                EngineState::Recording { .. } => Some(
                    control
                        .session
                        .take()
                        .ok_or_else(|| MacroError::invalid_state("recording is already stopping"))?,
                ),
            }
        };

        match session {
            None => {
                self.start_recording(slot).await?;
                Ok(true)
            }
            Some(session) => {
                let stop = tokio::spawn(Arc::clone(&self.shared).stop_recording(session));
                stop.await
                    .map_err(|e| MacroError::runtime(format!("recording stop task failed: {e}")))??;
                Ok(false)
            }
        }
    }

    async fn start_recording(&self, slot: usize) -> Result<()> {
        store::check_index(slot)?;

        // Hooks may block while the OS listener comes up; keep that off both
        // the runtime worker and the control lock.
        let (sink, events) = mpsc::channel(self.capture_buffer());
        let hook = Arc::clone(&self.shared.hook);
        let hook_id = tokio::task::spawn_blocking(move || hook.subscribe(sink))
            .await
            .map_err(|e| MacroError::runtime(format!("hook subscribe task failed: {e}")))??;

        let mut control = self.shared.control.lock();
        if control.state != EngineState::Idle {
            drop(control);
            if let Err(e) = self.shared.hook.unsubscribe(hook_id) {
                warn!(hook = hook_id.0, "failed to drop unused hook subscription: {e}");
            }
            return Err(MacroError::invalid_state(
                "engine became busy while the recording was starting",
            ));
        }

        control.session = Some(RecordingSession {
            slot,
            hook_id,
            collector: tokio::spawn(collect(events)),
        });
        self.shared
            .transition(&mut control, EngineState::Recording { slot });
        Ok(())
    }

    /// The recording whose save last failed, if any.
    pub fn unsaved_recording(&self) -> Option<UnsavedRecording> {
        self.shared.control.lock().unsaved.clone()
    }

    /// Remove and return the recording whose save last failed.
    pub fn take_unsaved(&self) -> Option<UnsavedRecording> {
        self.shared.control.lock().unsaved.take()
    }

    /// Save the recording whose save last failed into its slot.
    ///
    /// Returns the slot written, or `None` when nothing was pending. On
    /// failure the recording stays pending.
    pub async fn retry_save(&self) -> Result<Option<usize>> {
        let Some(recording) = self.take_unsaved() else {
            return Ok(None);
        };
        let slot = recording.slot;

        let save = tokio::spawn(Arc::clone(&self.shared).persist(recording));
        save.await
            .map_err(|e| MacroError::runtime(format!("slot save task failed: {e}")))??;
        info!(slot = slot, "pending recording saved");
        Ok(Some(slot))
    }

    /// Play back `slot` with its stored settings.
    pub fn play(&self, slot: usize) -> Result<PlaybackHandle> {
        self.play_with(slot, SettingsSnapshot::default())
    }

    /// Play back `slot`, applying `overrides` on top of the imported slot
    /// settings for this run only.
    ///
    /// Fails with `InvalidState` while recording or already playing. The
    /// replay itself runs on a spawned task; the returned handle can await
    /// or cancel it.
    pub fn play_with(&self, slot: usize, overrides: SettingsSnapshot) -> Result<PlaybackHandle> {
        store::check_index(slot)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| MacroError::runtime(format!("playback needs a Tokio runtime: {e}")))?;

        {
            let mut control = self.shared.control.lock();
            let state = control.state;
            match state {
                EngineState::Recording { .. } => {
                    return Err(MacroError::invalid_state(
                        "cannot play back while recording is active",
                    ))
                }
                EngineState::Playing { .. } => {
                    return Err(MacroError::invalid_state("a playback is already running"))
                }
                EngineState::Idle => self
                    .shared
                    .transition(&mut control, EngineState::Playing { slot }),
            }
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let guard = IdleGuard(Arc::clone(&self.shared));
        let task = runtime.spawn(run_playback(guard, slot, overrides, cancel_rx));

        Ok(PlaybackHandle {
            slot,
            task,
            cancel: PlaybackCancel(Arc::new(cancel_tx)),
        })
    }
}

async fn collect(mut events: mpsc::Receiver<CapturedKey>) -> EventLog {
    let mut log = EventLog::new();
    log.start();
    while let Some(captured) = events.recv().await {
        log.record(keys::name_of(&captured.key), captured.action, captured.at);
    }
    debug!(events = log.len(), "event collector finished");
    log
}

async fn run_playback(
    guard: IdleGuard,
    slot: usize,
    overrides: SettingsSnapshot,
    mut cancel: watch::Receiver<bool>,
) -> Result<PlaybackOutcome> {
    let shared = Arc::clone(&guard.0);

    let loader = Arc::clone(&shared);
    let slots = tokio::task::spawn_blocking(move || loader.store.load())
        .await
        .map_err(|e| MacroError::runtime(format!("slot load task failed: {e}")))??;
    let stored = slots.into_iter().nth(slot).unwrap_or_default();

    let Some(events) = stored.playable_events() else {
        info!(slot = slot, "no events recorded in slot, nothing to play");
        return Ok(PlaybackOutcome::EmptySlot);
    };

    let settings = {
        let mut current = shared.settings.lock();
        if let Some(snapshot) = &stored.settings {
            current.apply(snapshot);
        }
        let mut run = current.clone();
        run.apply(&overrides);
        run
    };

    info!(
        slot = slot,
        events = events.len(),
        repetitions = settings.repetitions,
        "starting playback"
    );

    let mut held: Vec<KeyHandle> = Vec::new();
    let mut injected = 0usize;

    for repetition in 0..settings.repetitions {
        debug!(repetition = repetition + 1, "playback pass");
        for event in events {
            let step = keys::resolve(&event.key).and_then(|key| {
                match event.action {
                    KeyAction::Press => {
                        shared.injector.press(&key)?;
                        if !held.contains(&key) {
                            held.push(key);
                        }
                    }
                    KeyAction::Release => {
                        shared.injector.release(&key)?;
                        held.retain(|h| *h != key);
                    }
                }
                Ok(())
            });

            if let Err(e) = step {
                warn!(slot = slot, key = %event.key, "playback aborted: {e}");
                release_held(shared.injector.as_ref(), &held);
                return Err(e);
            }
            injected += 1;

            if wait_or_cancel(settings.pacing_delay(event), &mut cancel).await {
                info!(slot = slot, injected = injected, "playback cancelled");
                release_held(shared.injector.as_ref(), &held);
                return Ok(PlaybackOutcome::Cancelled { injected });
            }
        }
    }

    info!(slot = slot, injected = injected, "playback finished");
    Ok(PlaybackOutcome::Completed {
        repetitions: settings.repetitions,
        injected,
    })
}

/// Sleep for `delay`; returns true if cancellation was requested.
async fn wait_or_cancel(delay: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow() {
        return true;
    }

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return *cancel.borrow(),
            changed = cancel.changed() => match changed {
                Ok(()) if *cancel.borrow() => return true,
                Ok(()) => continue,
                // Handle dropped: nobody can cancel any more
                Err(_) => {
                    (&mut sleep).await;
                    return false;
                }
            },
        }
    }
}

fn release_held(injector: &dyn KeyInjector, held: &[KeyHandle]) {
    for key in held {
        if let Err(e) = injector.release(key) {
            warn!(key = %key, "failed to release held key: {e}");
        }
    }
}

/// Requests cancellation of a playback run; detached from the handle so it
/// can be used while the handle is being awaited.
#[derive(Clone)]
pub struct PlaybackCancel(Arc<watch::Sender<bool>>);

impl PlaybackCancel {
    /// Ask the run to stop before its next event.
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Handle to a running playback.
///
/// Dropping it detaches the run; it keeps going until it finishes.
pub struct PlaybackHandle {
    slot: usize,
    task: JoinHandle<Result<PlaybackOutcome>>,
    cancel: PlaybackCancel,
}

impl PlaybackHandle {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn canceller(&self) -> PlaybackCancel {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run to end.
    pub async fn wait(self) -> Result<PlaybackOutcome> {
        self.task
            .await
            .map_err(|e| MacroError::runtime(format!("playback task failed: {e}")))?
    }
}
