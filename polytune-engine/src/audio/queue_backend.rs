//! Buffer-queue backend shape
//!
//! We keep a small set of fixed-size PCM buffers enqueued on a platform
//! device; the device signals a completion per consumed buffer and we refill
//! and re-enqueue. The device itself is supplied through `QueueDeviceFactory`
//! (platform glue or test fakes). Startup uses a strict prequeue: the first
//! buffers are only rendered once the render ring is charged, within a
//! bounded wait, so the stream does not open on silence.

use crate::audio::float_to_pcm16;
use crate::audio::output::{RenderSource, StreamParams};
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Buffers kept in flight on the device queue.
pub const QUEUE_BUFFER_COUNT: usize = 2;
/// Strict-prequeue wait for the ring to charge.
const STARTUP_READY_WAIT: Duration = Duration::from_millis(90);
/// Poll interval while waiting on the ring.
const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(2);
/// Service-loop completion wait; bounds command latency.
const COMPLETION_WAIT: Duration = Duration::from_millis(20);

/// A platform buffer-queue device.
///
/// The device receives a completion `Sender` at open time and must send one
/// unit per buffer it finishes consuming.
pub trait QueueDevice: Send {
    fn start(&mut self) -> bool;
    fn stop(&mut self);
    /// Enqueue one interleaved stereo PCM buffer. False on device failure.
    fn enqueue(&mut self, pcm: &[i16]) -> bool;
}

pub trait QueueDeviceFactory: Send + Sync {
    fn open(
        &self,
        sample_rate: u32,
        channels: u16,
        buffer_frames: usize,
        completions: Sender<()>,
    ) -> Option<Box<dyn QueueDevice>>;
}

enum ServiceCommand {
    Start(Sender<bool>),
    Stop(Sender<()>),
    Shutdown,
}

pub struct QueueStream {
    commands: Sender<ServiceCommand>,
    service_thread: Option<JoinHandle<()>>,
    sample_rate: u32,
    buffer_frames: usize,
    disconnected: Arc<AtomicBool>,
}

impl QueueStream {
    pub fn open(
        params: &StreamParams,
        factory: &dyn QueueDeviceFactory,
        source: Arc<dyn RenderSource>,
    ) -> Result<Self> {
        let sample_rate = if params.sample_rate_hint > 0 {
            params.sample_rate_hint
        } else {
            48_000
        };
        let buffer_frames = params.config.buffer_preset.device_buffer_frames();

        let (completion_tx, completion_rx) = mpsc::channel::<()>();
        let device = factory
            .open(sample_rate, 2, buffer_frames, completion_tx)
            .ok_or_else(|| Error::Backend("buffer-queue device open failed".into()))?;

        let (command_tx, command_rx) = mpsc::channel::<ServiceCommand>();
        let disconnected = Arc::new(AtomicBool::new(false));
        let thread_disconnected = Arc::clone(&disconnected);

        let service_thread = std::thread::Builder::new()
            .name("pt_queue_stream".into())
            .spawn(move || {
                service_loop(
                    device,
                    completion_rx,
                    command_rx,
                    source,
                    sample_rate,
                    buffer_frames,
                    thread_disconnected,
                );
            })
            .map_err(|e| Error::Backend(format!("failed to spawn queue service thread: {e}")))?;

        debug!(sample_rate, buffer_frames, "buffer-queue stream opened");
        Ok(Self {
            commands: command_tx,
            service_thread: Some(service_thread),
            sample_rate,
            buffer_frames,
            disconnected,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn burst_frames(&self) -> usize {
        self.buffer_frames
    }

    pub fn request_start(&mut self) -> bool {
        let (reply_tx, reply_rx) = mpsc::channel();
        if self.commands.send(ServiceCommand::Start(reply_tx)).is_err() {
            return false;
        }
        reply_rx.recv_timeout(Duration::from_secs(2)).unwrap_or(false)
    }

    pub fn request_stop(&mut self) {
        let (reply_tx, reply_rx) = mpsc::channel();
        if self.commands.send(ServiceCommand::Stop(reply_tx)).is_ok() {
            let _ = reply_rx.recv_timeout(Duration::from_secs(2));
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Relaxed)
    }
}

impl Drop for QueueStream {
    fn drop(&mut self) {
        let _ = self.commands.send(ServiceCommand::Shutdown);
        if let Some(handle) = self.service_thread.take() {
            let _ = handle.join();
        }
    }
}

struct ServiceState {
    float_buffer: Vec<f32>,
    pcm_buffer: Vec<i16>,
    running: bool,
    stop_after_current: bool,
}

#[allow(clippy::too_many_arguments)]
fn service_loop(
    mut device: Box<dyn QueueDevice>,
    completions: Receiver<()>,
    commands: Receiver<ServiceCommand>,
    source: Arc<dyn RenderSource>,
    sample_rate: u32,
    buffer_frames: usize,
    disconnected: Arc<AtomicBool>,
) {
    let samples = buffer_frames * 2;
    let mut state = ServiceState {
        float_buffer: vec![0.0; samples],
        pcm_buffer: vec![0; samples],
        running: false,
        stop_after_current: false,
    };

    loop {
        // Commands: blocking while idle, polled while running.
        let command = if state.running {
            match commands.try_recv() {
                Ok(command) => Some(command),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => Some(ServiceCommand::Shutdown),
            }
        } else {
            match commands.recv() {
                Ok(command) => Some(command),
                Err(_) => Some(ServiceCommand::Shutdown),
            }
        };

        match command {
            Some(ServiceCommand::Start(reply)) => {
                let started = start_stream(
                    &mut device,
                    &mut state,
                    &source,
                    &completions,
                    sample_rate,
                    buffer_frames,
                );
                state.running = started;
                let _ = reply.send(started);
                continue;
            }
            Some(ServiceCommand::Stop(reply)) => {
                if state.running {
                    device.stop();
                    state.running = false;
                    state.stop_after_current = false;
                    while completions.try_recv().is_ok() {}
                }
                let _ = reply.send(());
                continue;
            }
            Some(ServiceCommand::Shutdown) => {
                if state.running {
                    device.stop();
                }
                break;
            }
            None => {}
        }

        // Running: refill on each completion.
        match completions.recv_timeout(COMPLETION_WAIT) {
            Ok(()) => {
                if state.stop_after_current {
                    device.stop();
                    state.running = false;
                    state.stop_after_current = false;
                    continue;
                }
                let should_stop =
                    source.pull_frames(&mut state.float_buffer, buffer_frames, sample_rate);
                float_to_pcm16(&state.float_buffer, &mut state.pcm_buffer);
                if !device.enqueue(&state.pcm_buffer) {
                    error!("buffer-queue enqueue failed");
                    device.stop();
                    state.running = false;
                    disconnected.store(true, Ordering::Relaxed);
                    source.on_stream_error("buffer-queue enqueue failed");
                    continue;
                }
                if should_stop {
                    state.stop_after_current = true;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("buffer-queue completion channel closed");
                device.stop();
                state.running = false;
                disconnected.store(true, Ordering::Relaxed);
            }
        }
    }
}

fn start_stream(
    device: &mut Box<dyn QueueDevice>,
    state: &mut ServiceState,
    source: &Arc<dyn RenderSource>,
    completions: &Receiver<()>,
    sample_rate: u32,
    buffer_frames: usize,
) -> bool {
    // Strict startup: wait for the ring to hold at least one device buffer
    // before rendering the prequeue, so the first audible buffer is content.
    let deadline = Instant::now() + STARTUP_READY_WAIT;
    while source.buffered_frames() < buffer_frames && Instant::now() < deadline {
        source.request_more();
        std::thread::sleep(STARTUP_POLL_INTERVAL);
    }
    if source.buffered_frames() < buffer_frames {
        debug!(
            required = buffer_frames,
            buffered = source.buffered_frames(),
            "buffer-queue strict startup proceeding below target"
        );
    }

    // Stale completions from a previous run must not double-fill.
    while completions.try_recv().is_ok() {}
    state.stop_after_current = false;

    let mut queued = 0;
    for _ in 0..QUEUE_BUFFER_COUNT {
        let should_stop = source.pull_frames(&mut state.float_buffer, buffer_frames, sample_rate);
        float_to_pcm16(&state.float_buffer, &mut state.pcm_buffer);
        if !device.enqueue(&state.pcm_buffer) {
            break;
        }
        queued += 1;
        if should_stop {
            state.stop_after_current = true;
            break;
        }
    }
    if queued == 0 {
        error!("buffer-queue startup prequeue failed");
        return false;
    }
    if queued < QUEUE_BUFFER_COUNT {
        warn!(queued, expected = QUEUE_BUFFER_COUNT, "buffer-queue startup prequeue incomplete");
    }

    if !device.start() {
        error!("buffer-queue device start failed");
        return false;
    }
    true
}
