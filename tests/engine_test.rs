use macro_recorder::capability::{CapturedKey, HookId, KeyHook, KeyInjector, Unavailable};
use macro_recorder::keys::{KeyHandle, SpecialKey};
use macro_recorder::{
    EngineState, KeyAction, KeyEvent, MacroEngine, MacroError, PlaybackOutcome, Settings,
    SettingsSnapshot, SlotStore,
};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::task::Poll;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::{mpsc, Notify};

/// Hook driven by the test instead of the OS.
#[derive(Default)]
struct ScriptedHook {
    next_id: AtomicU64,
    sinks: Mutex<Vec<(HookId, mpsc::Sender<CapturedKey>)>>,
}

impl ScriptedHook {
    fn emit(&self, key: KeyHandle, action: KeyAction, at: Instant) {
        for (_, sink) in self.sinks.lock().unwrap().iter() {
            sink.try_send(CapturedKey { key, action, at }).unwrap();
        }
    }

    fn active(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }
}

impl KeyHook for ScriptedHook {
    fn subscribe(&self, sink: mpsc::Sender<CapturedKey>) -> macro_recorder::Result<HookId> {
        let id = HookId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sinks.lock().unwrap().push((id, sink));
        Ok(id)
    }

    fn unsubscribe(&self, id: HookId) -> macro_recorder::Result<()> {
        self.sinks.lock().unwrap().retain(|(sink_id, _)| *sink_id != id);
        Ok(())
    }
}

/// Hook whose subscribe blocks until the test opens the gate.
struct GatedHook {
    inner: ScriptedHook,
    entered: Notify,
    gate: Mutex<std_mpsc::Receiver<()>>,
}

impl KeyHook for GatedHook {
    fn subscribe(&self, sink: mpsc::Sender<CapturedKey>) -> macro_recorder::Result<HookId> {
        self.entered.notify_one();
        let _ = self.gate.lock().unwrap().recv();
        self.inner.subscribe(sink)
    }

    fn unsubscribe(&self, id: HookId) -> macro_recorder::Result<()> {
        self.inner.unsubscribe(id)
    }
}

/// Injector that remembers every call.
#[derive(Default)]
struct RecordingInjector {
    calls: Mutex<Vec<(KeyAction, KeyHandle)>>,
    fail: bool,
}

impl RecordingInjector {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<(KeyAction, KeyHandle)> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, action: KeyAction, key: &KeyHandle) -> macro_recorder::Result<()> {
        if self.fail {
            return Err(MacroError::capability("injection denied"));
        }
        self.calls.lock().unwrap().push((action, *key));
        Ok(())
    }
}

impl KeyInjector for RecordingInjector {
    fn press(&self, key: &KeyHandle) -> macro_recorder::Result<()> {
        self.push(KeyAction::Press, key)
    }

    fn release(&self, key: &KeyHandle) -> macro_recorder::Result<()> {
        self.push(KeyAction::Release, key)
    }
}

struct Fixture {
    _dir: TempDir,
    engine: MacroEngine,
    hook: Arc<ScriptedHook>,
    injector: Arc<RecordingInjector>,
}

fn fixture_with(injector: RecordingInjector) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let hook = Arc::new(ScriptedHook::default());
    let injector = Arc::new(injector);
    let engine = MacroEngine::new(
        SlotStore::new(dir.path().join("recorded_keys.json")),
        hook.clone(),
        injector.clone(),
    );
    Fixture {
        _dir: dir,
        engine,
        hook,
        injector,
    }
}

fn fixture() -> Fixture {
    fixture_with(RecordingInjector::default())
}

fn fast_settings(repetitions: u32) -> Settings {
    Settings {
        repetitions,
        regular_delay: 0.0,
        alt_tab_delay: 0.0,
    }
}

const A: KeyHandle = KeyHandle::Char('a');

#[tokio::test]
async fn test_recording_saves_events_with_hold_duration() {
    let fx = fixture();

    assert!(fx.engine.toggle_recording(1).await.unwrap());
    assert!(fx.engine.is_recording());
    assert_eq!(fx.engine.state(), EngineState::Recording { slot: 1 });
    assert_eq!(fx.hook.active(), 1);

    let t0 = Instant::now();
    fx.hook.emit(A, KeyAction::Press, t0);
    fx.hook.emit(A, KeyAction::Release, t0 + Duration::from_millis(250));

    assert!(!fx.engine.toggle_recording(1).await.unwrap());
    assert!(!fx.engine.is_recording());
    assert_eq!(fx.hook.active(), 0);

    let slots = fx.engine.load_slots().unwrap();
    let events = slots[1].events.as_ref().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], KeyEvent::press("'a'"));
    assert_eq!(events[1].action, KeyAction::Release);
    assert!((events[1].duration.unwrap() - 0.25).abs() <= 0.001);
    assert_eq!(slots[1].settings, Some(Settings::default().snapshot()));
    assert!(slots[0].is_empty());
    assert!(slots[2].is_empty());
}

#[tokio::test]
async fn test_release_without_press_is_saved_without_duration() {
    let fx = fixture();

    fx.engine.toggle_recording(0).await.unwrap();
    fx.hook.emit(
        KeyHandle::Special(SpecialKey::Shift),
        KeyAction::Release,
        Instant::now(),
    );
    fx.engine.toggle_recording(0).await.unwrap();

    let slots = fx.engine.load_slots().unwrap();
    assert_eq!(
        slots[0].events.as_deref(),
        Some(&[KeyEvent::release("Key.shift", None)][..])
    );
}

#[tokio::test]
async fn test_recording_does_not_touch_other_slots() {
    let fx = fixture();
    let kept = vec![KeyEvent::press("Key.f5"), KeyEvent::release("Key.f5", Some(0.1))];
    fx.engine
        .store()
        .save(0, kept.clone(), &fast_settings(2))
        .unwrap();

    fx.engine.toggle_recording(2).await.unwrap();
    fx.hook.emit(A, KeyAction::Press, Instant::now());
    fx.engine.toggle_recording(2).await.unwrap();

    let slots = fx.engine.load_slots().unwrap();
    assert_eq!(slots[0].events.as_deref(), Some(kept.as_slice()));
    assert_eq!(slots[0].settings, Some(fast_settings(2).snapshot()));
    assert_eq!(slots[2].events.as_ref().unwrap().len(), 1);
}

#[tokio::test]
async fn test_stop_saves_to_the_recording_slot() {
    let fx = fixture();

    fx.engine.toggle_recording(2).await.unwrap();
    fx.hook.emit(A, KeyAction::Press, Instant::now());
    fx.engine.toggle_recording(0).await.unwrap();

    let slots = fx.engine.load_slots().unwrap();
    assert!(slots[0].is_empty());
    assert!(!slots[2].is_empty());
}

#[tokio::test]
async fn test_recording_needs_a_hook() {
    let dir = tempfile::tempdir().unwrap();
    let engine = MacroEngine::new(
        SlotStore::new(dir.path().join("recorded_keys.json")),
        Arc::new(Unavailable),
        Arc::new(Unavailable),
    );

    let err = engine.toggle_recording(0).await.unwrap_err();
    assert!(matches!(err, MacroError::CapabilityUnavailable(_)));
    assert!(!engine.is_recording());
}

#[tokio::test]
async fn test_recording_rejects_bad_slot() {
    let fx = fixture();
    let err = fx.engine.toggle_recording(3).await.unwrap_err();
    assert!(matches!(err, MacroError::InvalidSlot { index: 3, .. }));
    assert!(!fx.engine.is_recording());
    assert_eq!(fx.hook.active(), 0);
}

#[tokio::test]
async fn test_play_empty_slot_is_a_no_op() {
    let fx = fixture();

    let outcome = fx.engine.play(0).unwrap().wait().await.unwrap();

    assert_eq!(outcome, PlaybackOutcome::EmptySlot);
    assert!(!fx.engine.is_playing());
    assert_eq!(fx.engine.state(), EngineState::Idle);
    assert!(fx.injector.calls().is_empty());
}

#[tokio::test]
async fn test_play_while_recording_is_rejected() {
    let fx = fixture();
    fx.engine
        .store()
        .save(0, vec![KeyEvent::press("'a'")], &fast_settings(1))
        .unwrap();

    fx.engine.toggle_recording(1).await.unwrap();
    let err = fx.engine.play(0).err().unwrap();
    assert!(matches!(err, MacroError::InvalidState(_)));
    assert!(fx.engine.is_recording());
    assert!(fx.injector.calls().is_empty());

    fx.engine.toggle_recording(1).await.unwrap();
}

#[tokio::test]
async fn test_repetitions_replay_in_order() {
    let fx = fixture();
    fx.engine
        .store()
        .save(
            0,
            vec![KeyEvent::press("'a'"), KeyEvent::release("'a'", Some(0.0))],
            &fast_settings(3),
        )
        .unwrap();

    let outcome = fx.engine.play(0).unwrap().wait().await.unwrap();

    assert_eq!(
        outcome,
        PlaybackOutcome::Completed {
            repetitions: 3,
            injected: 6
        }
    );
    let expected: Vec<_> = (0..3)
        .flat_map(|_| [(KeyAction::Press, A), (KeyAction::Release, A)])
        .collect();
    assert_eq!(fx.injector.calls(), expected);
    assert!(!fx.engine.is_playing());
}

#[tokio::test]
async fn test_unknown_key_aborts_and_returns_to_idle() {
    let fx = fixture();
    fx.engine
        .store()
        .save(
            0,
            vec![
                KeyEvent::press("'a'"),
                KeyEvent::press("Key.hyper"),
                KeyEvent::release("'a'", None),
            ],
            &fast_settings(1),
        )
        .unwrap();

    let err = fx.engine.play(0).unwrap().wait().await.unwrap_err();

    assert!(matches!(err, MacroError::UnknownKey { ref key } if key == "Key.hyper"));
    assert!(!fx.engine.is_playing());
    // The held 'a' is let go on the way out
    assert_eq!(
        fx.injector.calls(),
        vec![(KeyAction::Press, A), (KeyAction::Release, A)]
    );
}

#[tokio::test]
async fn test_injection_failure_returns_to_idle() {
    let fx = fixture_with(RecordingInjector::failing());
    fx.engine
        .store()
        .save(0, vec![KeyEvent::press("'a'")], &fast_settings(1))
        .unwrap();

    let err = fx.engine.play(0).unwrap().wait().await.unwrap_err();

    assert!(matches!(err, MacroError::CapabilityUnavailable(_)));
    assert!(!fx.engine.is_playing());
}

#[tokio::test]
async fn test_corrupt_store_fails_playback() {
    let fx = fixture();
    std::fs::write(fx.engine.store().path(), "{ not an array").unwrap();

    let err = fx.engine.play(1).unwrap().wait().await.unwrap_err();

    assert!(matches!(err, MacroError::CorruptStore { .. }));
    assert!(!fx.engine.is_playing());
}

#[tokio::test]
async fn test_second_play_rejected_and_cancel_stops_run() {
    let fx = fixture();
    let slow = Settings {
        repetitions: 1,
        regular_delay: 30.0,
        alt_tab_delay: 30.0,
    };
    fx.engine
        .store()
        .save(
            0,
            vec![KeyEvent::press("'a'"), KeyEvent::release("'a'", None)],
            &slow,
        )
        .unwrap();

    let handle = fx.engine.play(0).unwrap();
    assert!(fx.engine.is_playing());

    let err = fx.engine.play(0).err().unwrap();
    assert!(matches!(err, MacroError::InvalidState(_)));
    let err = fx.engine.toggle_recording(1).await.unwrap_err();
    assert!(matches!(err, MacroError::InvalidState(_)));

    handle.cancel();
    let outcome = handle.wait().await.unwrap();

    assert_eq!(outcome, PlaybackOutcome::Cancelled { injected: 1 });
    assert!(!fx.engine.is_playing());
    assert_eq!(
        fx.injector.calls(),
        vec![(KeyAction::Press, A), (KeyAction::Release, A)]
    );
}

#[tokio::test]
async fn test_slot_settings_are_imported_into_current_settings() {
    let fx = fixture();
    fx.engine
        .store()
        .save(0, vec![KeyEvent::press("'a'")], &fast_settings(2))
        .unwrap();
    assert_eq!(fx.engine.settings().repetitions, 1);

    fx.engine.play(0).unwrap().wait().await.unwrap();

    assert_eq!(fx.engine.settings(), fast_settings(2));
}

#[tokio::test]
async fn test_partial_slot_settings_override_field_by_field() {
    let fx = fixture();
    std::fs::write(
        fx.engine.store().path(),
        r#"[{"events": [{"key": "Key.esc", "action": "press"}], "settings": {"repetitions": 2}}]"#,
    )
    .unwrap();
    fx.engine.update_settings(|s| {
        s.regular_delay = 0.0;
        s.alt_tab_delay = 0.0;
    });

    fx.engine.play(0).unwrap().wait().await.unwrap();

    assert_eq!(fx.engine.settings(), fast_settings(2));
    assert_eq!(fx.injector.calls().len(), 2);
}

#[tokio::test]
async fn test_run_overrides_do_not_stick() {
    let fx = fixture();
    fx.engine
        .store()
        .save(0, vec![KeyEvent::press("'a'")], &fast_settings(4))
        .unwrap();

    let overrides = SettingsSnapshot {
        repetitions: Some(1),
        ..SettingsSnapshot::default()
    };
    let outcome = fx.engine.play_with(0, overrides).unwrap().wait().await.unwrap();

    assert_eq!(
        outcome,
        PlaybackOutcome::Completed {
            repetitions: 1,
            injected: 1
        }
    );
    assert_eq!(fx.engine.settings().repetitions, 4);
}

#[tokio::test]
async fn test_state_watch_reports_completion() {
    let fx = fixture();
    fx.engine
        .store()
        .save(0, vec![KeyEvent::press("'a'")], &fast_settings(1))
        .unwrap();

    let mut states = fx.engine.subscribe_state();
    let handle = fx.engine.play(0).unwrap();
    assert_eq!(*states.borrow_and_update(), EngineState::Playing { slot: 0 });

    let idle = states
        .wait_for(|state| *state == EngineState::Idle)
        .await
        .map(|state| *state)
        .unwrap();
    assert_eq!(idle, EngineState::Idle);
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn test_abandoned_stop_still_saves_and_returns_to_idle() {
    let fx = fixture();
    fx.engine.toggle_recording(0).await.unwrap();
    let t0 = Instant::now();
    fx.hook.emit(A, KeyAction::Press, t0);
    fx.hook.emit(A, KeyAction::Release, t0 + Duration::from_millis(100));

    let mut states = fx.engine.subscribe_state();
    let mut stop = Box::pin(fx.engine.toggle_recording(0));
    let first = std::future::poll_fn(|cx| Poll::Ready(stop.as_mut().poll(cx))).await;
    assert!(first.is_pending());
    drop(stop);

    states
        .wait_for(|state| *state == EngineState::Idle)
        .await
        .unwrap();
    let slots = fx.engine.load_slots().unwrap();
    assert_eq!(slots[0].events.as_ref().map(Vec::len), Some(2));
    assert_eq!(fx.hook.active(), 0);

    assert!(fx.engine.toggle_recording(1).await.unwrap());
    assert!(!fx.engine.toggle_recording(1).await.unwrap());
}

#[tokio::test]
async fn test_failed_save_keeps_recording_for_retry() {
    let fx = fixture();
    let path = fx.engine.store().path().to_path_buf();
    std::fs::write(&path, "garbage").unwrap();

    fx.engine.toggle_recording(0).await.unwrap();
    let t0 = Instant::now();
    fx.hook.emit(A, KeyAction::Press, t0);
    fx.hook.emit(A, KeyAction::Release, t0 + Duration::from_millis(80));

    let err = fx.engine.toggle_recording(0).await.unwrap_err();
    assert!(matches!(err, MacroError::CorruptStore { .. }));
    assert_eq!(fx.engine.state(), EngineState::Idle);

    let unsaved = fx.engine.unsaved_recording().unwrap();
    assert_eq!(unsaved.slot, 0);
    assert_eq!(unsaved.events.len(), 2);

    // Still corrupt: the events stay pending
    assert!(fx.engine.retry_save().await.is_err());
    assert_eq!(fx.engine.unsaved_recording(), Some(unsaved.clone()));

    std::fs::remove_file(&path).unwrap();
    assert_eq!(fx.engine.retry_save().await.unwrap(), Some(0));
    assert_eq!(fx.engine.unsaved_recording(), None);
    assert_eq!(fx.engine.retry_save().await.unwrap(), None);

    let slots = fx.engine.load_slots().unwrap();
    assert_eq!(slots[0].events.as_deref(), Some(unsaved.events.as_slice()));
}

#[tokio::test]
async fn test_slow_hook_does_not_block_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let (open_gate, gate) = std_mpsc::channel();
    let hook = Arc::new(GatedHook {
        inner: ScriptedHook::default(),
        entered: Notify::new(),
        gate: Mutex::new(gate),
    });
    let engine = MacroEngine::new(
        SlotStore::new(dir.path().join("recorded_keys.json")),
        hook.clone(),
        Arc::new(RecordingInjector::default()),
    );
    let slow = Settings {
        repetitions: 1,
        regular_delay: 30.0,
        alt_tab_delay: 30.0,
    };
    engine
        .store()
        .save(0, vec![KeyEvent::press("'a'")], &slow)
        .unwrap();

    let starting = tokio::spawn({
        let engine = engine.clone();
        async move { engine.toggle_recording(1).await }
    });
    hook.entered.notified().await;

    // Usable while the hook is still coming up
    assert_eq!(engine.state(), EngineState::Idle);
    let playback = engine.play(0).unwrap();

    open_gate.send(()).unwrap();
    let err = starting.await.unwrap().unwrap_err();
    assert!(matches!(err, MacroError::InvalidState(_)));
    assert_eq!(hook.inner.active(), 0);
    assert!(engine.is_playing());

    playback.cancel();
    assert_eq!(
        playback.wait().await.unwrap(),
        PlaybackOutcome::Cancelled { injected: 1 }
    );
}

#[test]
fn test_capture_buffer_is_shared_with_clones() {
    let fx = fixture();
    let other = fx.engine.clone();

    let engine = fx.engine.clone().with_capture_buffer(8);
    assert_eq!(other.capture_buffer(), 8);
    assert_eq!(engine.with_capture_buffer(0).capture_buffer(), 1);
}
