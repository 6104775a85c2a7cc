//! Blocking-write backend shape
//!
//! We own a writer thread that renders float chunks, converts to 16-bit PCM
//! and blocks on the device's `write`. The device paces us; terminal stop
//! exits the loop after a drain sleep so the tail is not cut off.

use crate::audio::float_to_pcm16;
use crate::audio::output::{RenderSource, StreamParams};
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Startup gate: wait this long for the ring to charge before first write.
const STARTUP_READY_WAIT: Duration = Duration::from_millis(240);
const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// A platform device with a blocking PCM write.
pub trait WriteDevice: Send {
    fn start(&mut self) -> bool;
    fn stop(&mut self);
    /// Write one interleaved stereo PCM buffer, blocking until the device
    /// accepts it. False on device failure.
    fn write(&mut self, pcm: &[i16]) -> bool;
}

pub trait WriteDeviceFactory: Send + Sync {
    fn open(&self, sample_rate: u32, channels: u16, buffer_frames: usize)
        -> Option<Box<dyn WriteDevice>>;
}

pub struct WriteStream {
    device: Arc<Mutex<Box<dyn WriteDevice>>>,
    source: Arc<dyn RenderSource>,
    writer_thread: Option<JoinHandle<()>>,
    stop_requested: Arc<AtomicBool>,
    disconnected: Arc<AtomicBool>,
    sample_rate: u32,
    buffer_frames: usize,
}

impl WriteStream {
    pub fn open(
        params: &StreamParams,
        factory: &dyn WriteDeviceFactory,
        source: Arc<dyn RenderSource>,
    ) -> Result<Self> {
        let sample_rate = if params.sample_rate_hint > 0 {
            params.sample_rate_hint
        } else {
            48_000
        };
        let buffer_frames = params.config.buffer_preset.device_buffer_frames();
        let device = factory
            .open(sample_rate, 2, buffer_frames)
            .ok_or_else(|| Error::Backend("blocking-write device open failed".into()))?;

        debug!(sample_rate, buffer_frames, "blocking-write stream opened");
        Ok(Self {
            device: Arc::new(Mutex::new(device)),
            source,
            writer_thread: None,
            stop_requested: Arc::new(AtomicBool::new(false)),
            disconnected: Arc::new(AtomicBool::new(false)),
            sample_rate,
            buffer_frames,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn burst_frames(&self) -> usize {
        self.buffer_frames
    }

    pub fn request_start(&mut self) -> bool {
        // Startup gate: let the render worker charge the ring first.
        let min_startup_frames = self.buffer_frames * 2;
        let deadline = Instant::now() + STARTUP_READY_WAIT;
        while self.source.buffered_frames() < min_startup_frames && Instant::now() < deadline {
            self.source.request_more();
            std::thread::sleep(STARTUP_POLL_INTERVAL);
        }

        self.join_writer();
        self.stop_requested.store(false, Ordering::Relaxed);
        if !self.device.lock().unwrap().start() {
            error!("blocking-write device start failed");
            return false;
        }

        let device = Arc::clone(&self.device);
        let source = Arc::clone(&self.source);
        let stop_requested = Arc::clone(&self.stop_requested);
        let disconnected = Arc::clone(&self.disconnected);
        let sample_rate = self.sample_rate;
        let buffer_frames = self.buffer_frames;
        match std::thread::Builder::new()
            .name("pt_write_stream".into())
            .spawn(move || {
                writer_loop(device, source, stop_requested, disconnected, sample_rate, buffer_frames);
            }) {
            Ok(handle) => {
                self.writer_thread = Some(handle);
                true
            }
            Err(e) => {
                error!(error = %e, "failed to spawn writer thread");
                false
            }
        }
    }

    pub fn request_stop(&mut self) {
        self.stop_requested.store(true, Ordering::Relaxed);
        self.join_writer();
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Relaxed)
    }

    fn join_writer(&mut self) {
        if let Some(handle) = self.writer_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WriteStream {
    fn drop(&mut self) {
        self.request_stop();
    }
}

fn writer_loop(
    device: Arc<Mutex<Box<dyn WriteDevice>>>,
    source: Arc<dyn RenderSource>,
    stop_requested: Arc<AtomicBool>,
    disconnected: Arc<AtomicBool>,
    sample_rate: u32,
    buffer_frames: usize,
) {
    let samples = buffer_frames * 2;
    let mut float_buffer = vec![0.0f32; samples];
    let mut pcm_buffer = vec![0i16; samples];

    while !stop_requested.load(Ordering::Relaxed) {
        let should_stop = source.pull_frames(&mut float_buffer, buffer_frames, sample_rate);
        float_to_pcm16(&float_buffer, &mut pcm_buffer);

        if !device.lock().unwrap().write(&pcm_buffer) {
            error!("blocking-write device write failed");
            disconnected.store(true, Ordering::Relaxed);
            source.on_stream_error("blocking-write device write failed");
            break;
        }

        if should_stop {
            stop_requested.store(true, Ordering::Relaxed);
            if sample_rate > 0 {
                // Let the device drain the final buffer before stopping.
                let drain_ms = ((buffer_frames * 1000) / sample_rate as usize).max(1);
                std::thread::sleep(Duration::from_millis(drain_ms as u64));
            }
            break;
        }
    }

    device.lock().unwrap().stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use std::sync::atomic::AtomicUsize;

    struct FakeWriteDevice {
        written: Arc<Mutex<Vec<i16>>>,
        started: Arc<AtomicBool>,
    }

    impl WriteDevice for FakeWriteDevice {
        fn start(&mut self) -> bool {
            self.started.store(true, Ordering::SeqCst);
            true
        }

        fn stop(&mut self) {
            self.started.store(false, Ordering::SeqCst);
        }

        fn write(&mut self, pcm: &[i16]) -> bool {
            self.written.lock().unwrap().extend_from_slice(pcm);
            // Pace roughly like a real device so the loop does not spin.
            std::thread::sleep(Duration::from_millis(1));
            true
        }
    }

    struct FakeWriteFactory {
        written: Arc<Mutex<Vec<i16>>>,
        started: Arc<AtomicBool>,
    }

    impl WriteDeviceFactory for FakeWriteFactory {
        fn open(
            &self,
            _sample_rate: u32,
            _channels: u16,
            _buffer_frames: usize,
        ) -> Option<Box<dyn WriteDevice>> {
            Some(Box::new(FakeWriteDevice {
                written: Arc::clone(&self.written),
                started: Arc::clone(&self.started),
            }))
        }
    }

    /// Source that raises the stop sentinel after a fixed number of pulls.
    struct CountdownSource {
        pulls_until_stop: AtomicUsize,
    }

    impl RenderSource for CountdownSource {
        fn pull_frames(&self, out: &mut [f32], _frames: usize, _rate: u32) -> bool {
            out.fill(0.25);
            self.pulls_until_stop
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(v.saturating_sub(1)))
                .unwrap()
                <= 1
        }

        fn buffered_frames(&self) -> usize {
            usize::MAX
        }

        fn request_more(&self) {}
        fn on_stream_error(&self, _description: &str) {}
    }

    #[test]
    fn writer_thread_writes_until_terminal_stop() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let started = Arc::new(AtomicBool::new(false));
        let factory = FakeWriteFactory {
            written: Arc::clone(&written),
            started: Arc::clone(&started),
        };
        let source = Arc::new(CountdownSource {
            pulls_until_stop: AtomicUsize::new(4),
        });
        let params = StreamParams {
            device_name: None,
            config: PipelineConfig::default(),
            sample_rate_hint: 48_000,
        };

        let mut stream = WriteStream::open(&params, &factory, source).unwrap();
        assert!(stream.request_start());

        // The writer exits on its own after the stop sentinel.
        let deadline = Instant::now() + Duration::from_secs(2);
        while started.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!started.load(Ordering::SeqCst), "device should be stopped");

        let pcm = written.lock().unwrap();
        let expected = (0.25f32 * 32767.0) as i16;
        assert_eq!(pcm.len(), 4 * stream.burst_frames() * 2);
        assert!(pcm.iter().all(|sample| *sample == expected));
    }
}
