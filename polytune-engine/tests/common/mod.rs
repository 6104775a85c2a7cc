//! Shared fixtures: scripted decoders and fake output devices.
#![allow(dead_code)]

use polytune_engine::audio::queue_backend::{QueueDevice, QueueDeviceFactory};
use polytune_engine::{Capabilities, Decoder, RepeatCapabilities, RepeatMode, TimelineMode};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Deterministic source: constant marker sample, scripted capabilities, an
/// optional per-read delay so scan seeks take measurable time.
pub struct ScriptedDecoder {
    pub sample_rate: u32,
    pub duration: f64,
    pub caps: Capabilities,
    pub timeline: TimelineMode,
    pub marker: f32,
    pub read_delay: Duration,
    position_frames: u64,
    seeks: Arc<Mutex<Vec<f64>>>,
    open: bool,
}

impl ScriptedDecoder {
    pub fn new(sample_rate: u32, duration: f64, marker: f32) -> Self {
        Self {
            sample_rate,
            duration,
            caps: Capabilities::SEEK
                | Capabilities::DIRECT_SEEK
                | Capabilities::RELIABLE_DURATION
                | Capabilities::LIVE_REPEAT_MODE,
            timeline: TimelineMode::ContinuousLinear,
            marker,
            read_delay: Duration::ZERO,
            position_frames: 0,
            seeks: Arc::new(Mutex::new(Vec::new())),
            open: false,
        }
    }

    pub fn seek_log(&self) -> Arc<Mutex<Vec<f64>>> {
        Arc::clone(&self.seeks)
    }

    fn total_frames(&self) -> u64 {
        (self.duration * self.sample_rate as f64) as u64
    }
}

impl Decoder for ScriptedDecoder {
    fn open(&mut self, _path: &Path) -> bool {
        self.open = true;
        self.position_frames = 0;
        true
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn read(&mut self, buffer: &mut [f32], frames: usize) -> usize {
        if !self.open {
            return 0;
        }
        if !self.read_delay.is_zero() {
            std::thread::sleep(self.read_delay);
        }
        let remaining = self.total_frames().saturating_sub(self.position_frames);
        let produced = (frames as u64).min(remaining) as usize;
        buffer[..produced * 2].fill(self.marker);
        self.position_frames += produced as u64;
        produced
    }

    fn seek(&mut self, seconds: f64) {
        self.seeks.lock().unwrap().push(seconds);
        let clamped = seconds.clamp(0.0, self.duration);
        self.position_frames = (clamped * self.sample_rate as f64) as u64;
    }

    fn duration_seconds(&mut self) -> f64 {
        self.duration
    }

    fn sample_rate(&mut self) -> u32 {
        self.sample_rate
    }

    fn channel_count(&mut self) -> usize {
        2
    }

    fn playback_position_seconds(&mut self) -> f64 {
        self.position_frames as f64 / self.sample_rate as f64
    }

    fn playback_capabilities(&self) -> Capabilities {
        self.caps
    }

    fn repeat_capabilities(&self) -> RepeatCapabilities {
        RepeatCapabilities::TRACK
    }

    fn timeline_mode(&self) -> TimelineMode {
        self.timeline
    }

    fn set_repeat_mode(&mut self, _mode: RepeatMode) {}

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Fake buffer-queue device: a pump thread consumes one queued buffer per
/// millisecond, so playback runs far faster than real time.
pub struct FakeQueueDevice {
    completions: Sender<()>,
    queued: Arc<AtomicUsize>,
    consumed: Arc<Mutex<Vec<i16>>>,
    running: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
}

impl QueueDevice for FakeQueueDevice {
    fn start(&mut self) -> bool {
        self.running.store(true, Ordering::SeqCst);
        let queued = Arc::clone(&self.queued);
        let running = Arc::clone(&self.running);
        let completions = self.completions.clone();
        self.pump = Some(std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                if queued.load(Ordering::SeqCst) > 0 {
                    queued.fetch_sub(1, Ordering::SeqCst);
                    if completions.send(()).is_err() {
                        break;
                    }
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }));
        true
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
    }

    fn enqueue(&mut self, pcm: &[i16]) -> bool {
        self.consumed.lock().unwrap().extend_from_slice(pcm);
        self.queued.fetch_add(1, Ordering::SeqCst);
        true
    }
}

#[derive(Default)]
pub struct FakeQueueFactory {
    pub consumed: Arc<Mutex<Vec<i16>>>,
    pub opens: AtomicUsize,
}

impl QueueDeviceFactory for FakeQueueFactory {
    fn open(
        &self,
        _sample_rate: u32,
        _channels: u16,
        _buffer_frames: usize,
        completions: Sender<()>,
    ) -> Option<Box<dyn QueueDevice>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Some(Box::new(FakeQueueDevice {
            completions,
            queued: Arc::new(AtomicUsize::new(0)),
            consumed: Arc::clone(&self.consumed),
            running: Arc::new(AtomicBool::new(false)),
            pump: None,
        }))
    }
}

/// Poll `predicate` until it holds or the deadline passes.
pub fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    predicate()
}
