//! Facade-level integration tests
//!
//! Drive the public engine surface with scripted decoders and a fake
//! buffer-queue device, so no audio hardware is involved. The fake device
//! consumes ~1 buffer per millisecond, well above real time.

mod common;

use common::{wait_until, FakeQueueFactory, ScriptedDecoder};
use polytune_engine::{
    BackendPreference, Capabilities, DecoderRegistry, PipelineConfig, PlayerEngine, RepeatMode,
    TimelineMode,
};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn queue_only_config() -> PipelineConfig {
    PipelineConfig {
        backend: BackendPreference::BufferQueue,
        allow_fallback: false,
        ..PipelineConfig::default()
    }
}

fn build_registry() -> DecoderRegistry {
    let mut registry = DecoderRegistry::new();

    // Direct-seek-capable marker source, extension "direct".
    registry.register("scripted", &["direct"], 10, || {
        Box::new(ScriptedDecoder::new(48_000, 600.0, 0.25))
    });

    // Scan-only source with a 1 ms read delay, extension "scan".
    registry.register("scan", &["scan"], 20, || {
        let mut decoder = ScriptedDecoder::new(48_000, 600.0, 0.25);
        decoder.caps = Capabilities::SEEK | Capabilities::RELIABLE_DURATION;
        decoder.read_delay = Duration::from_millis(1);
        Box::new(decoder)
    });

    // Short marker source for natural-end tests, extension "short".
    registry.register("short", &["short"], 30, || {
        Box::new(ScriptedDecoder::new(48_000, 0.25, 0.25))
    });

    // Second marker source for swap tests, extension "swap".
    registry.register("swap", &["swap"], 40, || {
        Box::new(ScriptedDecoder::new(48_000, 600.0, 0.75))
    });

    registry
}

fn build_engine() -> (PlayerEngine, Arc<FakeQueueFactory>) {
    let registry = build_registry();
    let factory = Arc::new(FakeQueueFactory::default());
    let engine = PlayerEngine::builder(Arc::new(registry))
        .pipeline_config(queue_only_config())
        .queue_device_factory(Arc::clone(&factory) as _)
        .build();
    (engine, factory)
}

#[test]
fn direct_seek_resolves_synchronously() {
    let (engine, _factory) = build_engine();
    engine.set_source(Path::new("track.direct")).unwrap();

    engine.seek_to(37.5);
    // Direct seek path: resolved within the facade call.
    assert!(!engine.is_seek_in_progress());
    assert!((engine.position_seconds() - 37.5).abs() < 0.01);
}

#[test]
fn repeated_seek_is_idempotent() {
    let (engine, _factory) = build_engine();
    engine.set_source(Path::new("track.direct")).unwrap();

    engine.seek_to(12.0);
    let first = engine.position_seconds();
    engine.seek_to(12.0);
    let second = engine.position_seconds();
    assert_eq!(first, second);
}

#[test]
fn async_scan_seek_resolves_and_clamps() {
    let (engine, _factory) = build_engine();
    engine.set_source(Path::new("track.scan")).unwrap();

    engine.seek_to(10.0);
    // Optimistic target published immediately for UI polls.
    assert!((engine.position_seconds() - 10.0).abs() < 0.01);
    assert!(engine.is_seek_in_progress());

    assert!(
        wait_until(Duration::from_secs(5), || !engine.is_seek_in_progress()),
        "scan seek did not complete"
    );
    assert!((engine.position_seconds() - 10.0).abs() < 0.2);
}

#[test]
fn new_seek_cancels_running_scan() {
    let (engine, _factory) = build_engine();
    engine.set_source(Path::new("track.scan")).unwrap();

    engine.seek_to(120.0);
    std::thread::sleep(Duration::from_millis(30));
    engine.seek_to(10.0);

    assert!(
        wait_until(Duration::from_secs(5), || !engine.is_seek_in_progress()),
        "replacement seek did not complete"
    );
    let position = engine.position_seconds();
    assert!(
        (position - 10.0).abs() < 0.5,
        "expected the replacement target, got {position}"
    );
}

#[test]
fn natural_end_fires_only_on_decoder_end() {
    let (engine, _factory) = build_engine();
    engine.set_source(Path::new("track.short")).unwrap();

    // A stop/start pair must not produce a natural-end event.
    engine.start().unwrap();
    engine.stop();
    assert!(!engine.consume_natural_end_event());

    engine.start().unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || !engine.is_playing()),
        "playback did not reach natural end"
    );
    assert!(engine.consume_natural_end_event());
    // Exchange-reset semantics: consumed once.
    assert!(!engine.consume_natural_end_event());
    // Position snapped to the duration.
    assert!((engine.position_seconds() - 0.25).abs() < 0.05);
}

#[test]
fn no_frames_from_previous_source_after_swap() {
    let (engine, factory) = build_engine();
    engine.set_source(Path::new("track.direct")).unwrap();
    engine.start().unwrap();

    // Let some first-source audio through.
    assert!(
        wait_until(Duration::from_secs(5), || {
            factory.consumed.lock().unwrap().len() > 8192
        }),
        "first source produced no output"
    );

    engine.set_source(Path::new("track.swap")).unwrap();
    let swap_at = factory.consumed.lock().unwrap().len();
    assert!(
        wait_until(Duration::from_secs(5), || {
            factory.consumed.lock().unwrap().len() > swap_at + 16384
        }),
        "second source produced no output"
    );
    engine.stop();

    let first_marker = (0.25f32 * 32767.0) as i16;
    let second_marker = (0.75f32 * 32767.0) as i16;
    let pcm = factory.consumed.lock().unwrap();
    let first_second_marker = pcm.iter().position(|s| *s == second_marker);
    let position = first_second_marker.expect("second source marker never appeared");
    assert!(
        pcm[position..].iter().all(|s| *s != first_marker),
        "stale first-source samples after the swap"
    );
}

#[test]
fn pause_fade_stops_without_natural_end() {
    let (engine, factory) = build_engine();
    engine.set_source(Path::new("track.direct")).unwrap();
    engine.start().unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            factory.consumed.lock().unwrap().len() > 4096
        }),
        "no output before fade"
    );

    engine.stop_with_pause_resume_fade(100, 16.0);
    assert!(
        wait_until(Duration::from_secs(5), || !engine.is_playing()),
        "fade-out did not stop playback"
    );
    assert!(!engine.consume_natural_end_event());
}

#[test]
fn identical_pipeline_config_rebuilds_only_once() {
    let (engine, factory) = build_engine();
    engine.set_source(Path::new("track.direct")).unwrap();
    engine.start().unwrap();
    assert_eq!(factory.opens.load(Ordering::SeqCst), 1);

    // Identical config: no rebuild.
    engine.set_audio_pipeline_config(queue_only_config());
    assert_eq!(factory.opens.load(Ordering::SeqCst), 1);

    // Changed config: exactly one more build.
    let mut changed = queue_only_config();
    changed.buffer_preset = polytune_engine::BufferPreset::Medium;
    engine.set_audio_pipeline_config(changed);
    assert_eq!(factory.opens.load(Ordering::SeqCst), 2);

    // Identical again: still one build for that config.
    engine.set_audio_pipeline_config(changed);
    assert_eq!(factory.opens.load(Ordering::SeqCst), 2);
    engine.stop();
}

#[test]
fn repeat_mode_set_is_idempotent() {
    let (engine, _factory) = build_engine();
    engine.set_source(Path::new("track.direct")).unwrap();

    engine.set_repeat_mode(RepeatMode::TrackSet);
    let position = engine.position_seconds();
    engine.set_repeat_mode(RepeatMode::TrackSet);
    assert_eq!(engine.repeat_mode(), RepeatMode::TrackSet);
    assert_eq!(engine.position_seconds(), position);

    engine.set_looping(false);
    assert_eq!(engine.repeat_mode(), RepeatMode::Off);
}

#[test]
fn source_open_failure_leaves_slot_empty() {
    let (engine, _factory) = build_engine();
    assert!(engine.set_source(Path::new("track.unknown")).is_err());
    assert_eq!(engine.duration_seconds(), 0.0);
    assert_eq!(engine.position_seconds(), 0.0);
    assert!(engine.current_decoder_name().is_none());
}

#[test]
fn backend_disconnect_recovers_on_next_start() {
    use polytune_engine::audio::queue_backend::{QueueDevice, QueueDeviceFactory};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc::Sender;

    /// Device that dies after a fixed number of enqueues.
    struct DyingDevice {
        inner: Box<dyn QueueDevice>,
        enqueues_left: usize,
    }

    impl QueueDevice for DyingDevice {
        fn start(&mut self) -> bool {
            self.inner.start()
        }
        fn stop(&mut self) {
            self.inner.stop();
        }
        fn enqueue(&mut self, pcm: &[i16]) -> bool {
            if self.enqueues_left == 0 {
                return false;
            }
            self.enqueues_left -= 1;
            self.inner.enqueue(pcm)
        }
    }

    struct DyingFirstFactory {
        inner: FakeQueueFactory,
        opens: AtomicUsize,
    }

    impl QueueDeviceFactory for DyingFirstFactory {
        fn open(
            &self,
            sample_rate: u32,
            channels: u16,
            buffer_frames: usize,
            completions: Sender<()>,
        ) -> Option<Box<dyn QueueDevice>> {
            let device = self
                .inner
                .open(sample_rate, channels, buffer_frames, completions)?;
            let count = self.opens.fetch_add(1, Ordering::SeqCst);
            if count == 0 {
                // First device fails mid-playback.
                Some(Box::new(DyingDevice {
                    inner: device,
                    enqueues_left: 30,
                }))
            } else {
                Some(device)
            }
        }
    }

    let registry = build_registry();
    let factory = Arc::new(DyingFirstFactory {
        inner: FakeQueueFactory::default(),
        opens: AtomicUsize::new(0),
    });
    let engine = PlayerEngine::builder(Arc::new(registry))
        .pipeline_config(queue_only_config())
        .queue_device_factory(Arc::clone(&factory) as _)
        .build();

    engine.set_source(Path::new("track.direct")).unwrap();
    engine.start().unwrap();

    // The first device dies; the error callback latches a rebuild and clears
    // the playing flag.
    assert!(
        wait_until(Duration::from_secs(5), || !engine.is_playing()),
        "device failure did not stop playback"
    );
    let position_at_failure = engine.position_seconds();

    engine.start().unwrap();
    assert!(engine.is_playing());
    assert!(factory.opens.load(Ordering::SeqCst) >= 2, "no rebuilt stream");
    // Playback resumed from the last published position, not from zero.
    assert!(engine.position_seconds() + 0.001 >= position_at_failure);
    engine.stop();
}

#[test]
fn discontinuous_timeline_source_plays() {
    let mut registry = DecoderRegistry::new();
    registry.register("tracker", &["trk"], 10, || {
        let mut decoder = ScriptedDecoder::new(44_100, 600.0, 0.1);
        decoder.timeline = TimelineMode::Discontinuous;
        decoder.caps = Capabilities::SEEK | Capabilities::LIVE_REPEAT_MODE;
        Box::new(decoder)
    });
    let factory = Arc::new(FakeQueueFactory::default());
    let engine = PlayerEngine::builder(Arc::new(registry))
        .pipeline_config(queue_only_config())
        .queue_device_factory(Arc::clone(&factory) as _)
        .build();

    engine.set_source(Path::new("song.trk")).unwrap();
    engine.start().unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || engine.position_seconds() > 0.05),
        "smoothed position did not advance"
    );
    let position = engine.position_seconds();
    assert!(position > 0.0 && position <= 600.0);
    engine.stop();
}
