//! Callback-pull backend over cpal
//!
//! The platform audio thread calls into us with a frame budget; we pull
//! interleaved stereo from the `RenderSource` and map it onto the device
//! layout. `cpal::Stream` is `!Send`, so a dedicated host thread owns the
//! stream for its whole life and services play/pause/shutdown commands over a
//! channel. The data callback itself never blocks on anything but the
//! source's short ring lock.

use crate::audio::output::{RenderSource, StreamParams};
use crate::config::{BufferPreset, PerformanceMode};
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, FromSample, SampleFormat, SizedSample, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Fallback burst estimate when the device keeps its default buffer size.
const DEFAULT_BURST_FRAMES: usize = 480;
/// How often the host thread polls the stop sentinel.
const HOST_POLL_INTERVAL: Duration = Duration::from_millis(50);

enum HostCommand {
    Play(Sender<bool>),
    Pause(Sender<()>),
    Shutdown,
}

struct StreamInfo {
    sample_rate: u32,
    burst_frames: usize,
}

pub struct PullStream {
    commands: Sender<HostCommand>,
    host_thread: Option<JoinHandle<()>>,
    sample_rate: u32,
    burst_frames: usize,
    disconnected: Arc<AtomicBool>,
}

impl PullStream {
    pub fn open(params: &StreamParams, source: Arc<dyn RenderSource>) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel::<HostCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<StreamInfo, String>>();
        let disconnected = Arc::new(AtomicBool::new(false));

        let device_name = params.device_name.clone();
        let buffer_preset = params.config.buffer_preset;
        let performance = params.config.performance;
        let thread_disconnected = Arc::clone(&disconnected);

        let host_thread = std::thread::Builder::new()
            .name("pt_stream_host".into())
            .spawn(move || {
                host_thread_main(
                    device_name,
                    buffer_preset,
                    performance,
                    source,
                    thread_disconnected,
                    ready_tx,
                    command_rx,
                );
            })
            .map_err(|e| Error::Backend(format!("failed to spawn stream host thread: {e}")))?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(info)) => Ok(Self {
                commands: command_tx,
                host_thread: Some(host_thread),
                sample_rate: info.sample_rate,
                burst_frames: info.burst_frames,
                disconnected,
            }),
            Ok(Err(message)) => {
                let _ = host_thread.join();
                Err(Error::Backend(message))
            }
            Err(_) => {
                let _ = command_tx.send(HostCommand::Shutdown);
                Err(Error::Backend("stream host thread did not report readiness".into()))
            }
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn burst_frames(&self) -> usize {
        self.burst_frames
    }

    pub fn request_start(&mut self) -> bool {
        let (reply_tx, reply_rx) = mpsc::channel();
        if self.commands.send(HostCommand::Play(reply_tx)).is_err() {
            return false;
        }
        reply_rx.recv_timeout(Duration::from_secs(2)).unwrap_or(false)
    }

    pub fn request_stop(&mut self) {
        let (reply_tx, reply_rx) = mpsc::channel();
        if self.commands.send(HostCommand::Pause(reply_tx)).is_ok() {
            let _ = reply_rx.recv_timeout(Duration::from_secs(2));
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Relaxed)
    }
}

impl Drop for PullStream {
    fn drop(&mut self) {
        let _ = self.commands.send(HostCommand::Shutdown);
        if let Some(handle) = self.host_thread.take() {
            let _ = handle.join();
        }
    }
}

fn pick_device(device_name: Option<&str>) -> std::result::Result<Device, String> {
    let host = cpal::default_host();
    if let Some(name) = device_name {
        let mut devices = host
            .output_devices()
            .map_err(|e| format!("failed to enumerate devices: {e}"))?;
        devices
            .find(|d| d.name().ok().as_deref() == Some(name))
            .ok_or_else(|| format!("device '{name}' not found"))
    } else {
        host.default_output_device()
            .ok_or_else(|| "no default output device found".to_string())
    }
}

fn requested_buffer_size(preset: BufferPreset, performance: PerformanceMode) -> BufferSize {
    match preset {
        // Auto-sized preset: follow the device default unless the host asked
        // for power saving, which tolerates a deeper buffer.
        BufferPreset::VerySmall => match performance {
            PerformanceMode::PowerSaving => BufferSize::Fixed(2048),
            _ => BufferSize::Default,
        },
        other => BufferSize::Fixed(other.device_buffer_frames() as u32),
    }
}

#[allow(clippy::too_many_arguments)]
fn host_thread_main(
    device_name: Option<String>,
    buffer_preset: BufferPreset,
    performance: PerformanceMode,
    source: Arc<dyn RenderSource>,
    disconnected: Arc<AtomicBool>,
    ready_tx: Sender<std::result::Result<StreamInfo, String>>,
    command_rx: Receiver<HostCommand>,
) {
    let device = match pick_device(device_name.as_deref()) {
        Ok(device) => device,
        Err(message) => {
            let _ = ready_tx.send(Err(message));
            return;
        }
    };
    let device_label = device.name().unwrap_or_else(|_| "Unknown".to_string());
    info!(device = %device_label, "using audio output device");

    let default_config = match device.default_output_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = ready_tx.send(Err(format!("failed to get default config: {e}")));
            return;
        }
    };
    let sample_format = default_config.sample_format();
    let mut config: StreamConfig = default_config.into();
    config.buffer_size = requested_buffer_size(buffer_preset, performance);

    let sample_rate = config.sample_rate.0;
    let burst_frames = match config.buffer_size {
        BufferSize::Fixed(frames) => frames as usize,
        BufferSize::Default => DEFAULT_BURST_FRAMES,
    };
    debug!(
        sample_rate,
        channels = config.channels,
        format = ?sample_format,
        burst_frames,
        "building callback-pull stream"
    );

    // The stop sentinel is raised from inside the data callback; the host
    // thread pauses the stream from outside on the next poll.
    let stop_sentinel = Arc::new(AtomicBool::new(false));

    let build_result = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, source, &disconnected, &stop_sentinel, sample_rate),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, source, &disconnected, &stop_sentinel, sample_rate),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, source, &disconnected, &stop_sentinel, sample_rate),
        other => Err(format!("unsupported sample format: {other:?}")),
    };

    let stream = match build_result {
        Ok(stream) => stream,
        Err(message) => {
            let _ = ready_tx.send(Err(message));
            return;
        }
    };

    let _ = ready_tx.send(Ok(StreamInfo {
        sample_rate,
        burst_frames,
    }));

    loop {
        match command_rx.recv_timeout(HOST_POLL_INTERVAL) {
            Ok(HostCommand::Play(reply)) => {
                let ok = stream.play().is_ok();
                if !ok {
                    warn!("callback-pull stream refused to start");
                }
                let _ = reply.send(ok);
            }
            Ok(HostCommand::Pause(reply)) => {
                if let Err(e) = stream.pause() {
                    warn!(error = %e, "callback-pull stream pause failed");
                }
                let _ = reply.send(());
            }
            Ok(HostCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if stop_sentinel.swap(false, Ordering::Relaxed) {
                    let _ = stream.pause();
                }
            }
        }
    }
    drop(stream);
    debug!("stream host thread exited");
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    source: Arc<dyn RenderSource>,
    disconnected: &Arc<AtomicBool>,
    stop_sentinel: &Arc<AtomicBool>,
    callback_rate: u32,
) -> std::result::Result<cpal::Stream, String>
where
    T: SizedSample + FromSample<f32>,
{
    let device_channels = config.channels as usize;
    let stop_flag = Arc::clone(stop_sentinel);
    let error_source = Arc::clone(&source);
    let error_disconnected = Arc::clone(disconnected);

    let mut stereo_scratch: Vec<f32> = Vec::new();

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / device_channels.max(1);
                if frames == 0 {
                    return;
                }
                if stereo_scratch.len() < frames * 2 {
                    stereo_scratch.resize(frames * 2, 0.0);
                }
                let should_stop =
                    source.pull_frames(&mut stereo_scratch[..frames * 2], frames, callback_rate);
                for frame in 0..frames {
                    let left = stereo_scratch[frame * 2];
                    let right = stereo_scratch[frame * 2 + 1];
                    let base = frame * device_channels;
                    match device_channels {
                        1 => data[base] = T::from_sample((left + right) * 0.5),
                        _ => {
                            data[base] = T::from_sample(left);
                            data[base + 1] = T::from_sample(right);
                            for extra in 2..device_channels {
                                data[base + extra] = T::from_sample(0.0f32);
                            }
                        }
                    }
                }
                if should_stop {
                    stop_flag.store(true, Ordering::Relaxed);
                }
            },
            move |err| {
                error!(error = %err, "audio stream error callback");
                error_disconnected.store(true, Ordering::Relaxed);
                error_source.on_stream_error(&err.to_string());
            },
            None,
        )
        .map_err(|e| format!("failed to build stream: {e}"))?;

    Ok(stream)
}
