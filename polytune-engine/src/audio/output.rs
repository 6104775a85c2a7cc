//! Output stream adapter
//!
//! Unifies three backend shapes behind one start/stop surface: callback-pull
//! (the backend calls us with a frame budget), buffer-queue (we enqueue fixed
//! buffers, the backend re-enters on completion), and blocking-write (we own
//! a writer thread). Backend selection walks a deduplicated preference chain;
//! the auto order is callback-pull, then buffer-queue, then blocking-write.

use crate::audio::pull_backend::PullStream;
use crate::audio::queue_backend::{QueueDeviceFactory, QueueStream};
use crate::audio::write_backend::{WriteDeviceFactory, WriteStream};
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// What the engine exposes to the output backends.
///
/// `pull_frames` is the hot path: fill `out` with interleaved stereo and
/// return true when the stream should stop after this buffer. The other
/// methods exist for backend startup gates (waiting until the render ring is
/// charged) and error reporting.
pub trait RenderSource: Send + Sync + 'static {
    fn pull_frames(&self, out: &mut [f32], frames: usize, callback_rate: u32) -> bool;
    /// Frames currently buffered ahead of the output.
    fn buffered_frames(&self) -> usize;
    /// Nudge the producer to fill more.
    fn request_more(&self);
    fn on_stream_error(&self, description: &str);
}

/// Platform integration points for the queue and write shapes.
///
/// The callback-pull backend binds to the host audio API directly; the other
/// two shapes need a device supplied by the embedder (or by tests).
#[derive(Clone, Default)]
pub struct DeviceHooks {
    pub queue_factory: Option<Arc<dyn QueueDeviceFactory>>,
    pub write_factory: Option<Arc<dyn WriteDeviceFactory>>,
}

/// Which backend shape a stream ended up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveBackend {
    CallbackPull,
    BufferQueue,
    BlockingWrite,
}

impl ActiveBackend {
    pub fn label(self) -> &'static str {
        match self {
            Self::CallbackPull => "callback-pull",
            Self::BufferQueue => "buffer-queue",
            Self::BlockingWrite => "blocking-write",
        }
    }
}

/// Stream-open parameters.
#[derive(Debug, Clone, Default)]
pub struct StreamParams {
    pub device_name: Option<String>,
    pub config: PipelineConfig,
    /// Preferred sample rate for device-agnostic backends; 0 lets the
    /// backend pick.
    pub sample_rate_hint: u32,
}

enum BackendImpl {
    Pull(PullStream),
    Queue(QueueStream),
    Write(WriteStream),
}

/// An open output stream on one of the three backend shapes.
pub struct OutputStream {
    backend: BackendImpl,
    kind: ActiveBackend,
    sample_rate: u32,
    burst_frames: usize,
}

impl OutputStream {
    /// Open a stream, walking the preference/fallback chain.
    pub fn open(
        params: &StreamParams,
        hooks: &DeviceHooks,
        source: Arc<dyn RenderSource>,
    ) -> Result<Self> {
        use crate::config::BackendPreference as Pref;

        let mut attempts: Vec<ActiveBackend> = Vec::with_capacity(3);
        let mut add = |list: &mut Vec<ActiveBackend>, backend: ActiveBackend| {
            if !list.contains(&backend) {
                list.push(backend);
            }
        };

        let allow_fallback = params.config.allow_fallback;
        match params.config.backend {
            Pref::CallbackPull => {
                add(&mut attempts, ActiveBackend::CallbackPull);
                if allow_fallback {
                    add(&mut attempts, ActiveBackend::BufferQueue);
                    add(&mut attempts, ActiveBackend::BlockingWrite);
                }
            }
            Pref::BufferQueue => {
                add(&mut attempts, ActiveBackend::BufferQueue);
                if allow_fallback {
                    add(&mut attempts, ActiveBackend::CallbackPull);
                    add(&mut attempts, ActiveBackend::BlockingWrite);
                }
            }
            Pref::BlockingWrite => {
                add(&mut attempts, ActiveBackend::BlockingWrite);
                if allow_fallback {
                    add(&mut attempts, ActiveBackend::BufferQueue);
                    add(&mut attempts, ActiveBackend::CallbackPull);
                }
            }
            Pref::Auto => {
                add(&mut attempts, ActiveBackend::CallbackPull);
                if allow_fallback {
                    add(&mut attempts, ActiveBackend::BufferQueue);
                    add(&mut attempts, ActiveBackend::BlockingWrite);
                }
            }
        }

        for backend in attempts {
            match Self::try_open(backend, params, hooks, Arc::clone(&source)) {
                Ok(stream) => {
                    info!(
                        backend = backend.label(),
                        sample_rate = stream.sample_rate,
                        burst_frames = stream.burst_frames,
                        buffer_preset = ?params.config.buffer_preset,
                        allow_fallback,
                        "output stream opened"
                    );
                    return Ok(stream);
                }
                Err(e) => {
                    warn!(backend = backend.label(), error = %e, "backend open failed");
                }
            }
        }

        Err(Error::StreamOpen {
            preference: params.config.backend.label(),
            allow_fallback,
        })
    }

    fn try_open(
        backend: ActiveBackend,
        params: &StreamParams,
        hooks: &DeviceHooks,
        source: Arc<dyn RenderSource>,
    ) -> Result<Self> {
        match backend {
            ActiveBackend::CallbackPull => {
                let stream = PullStream::open(params, source)?;
                let sample_rate = stream.sample_rate();
                let burst_frames = stream.burst_frames();
                Ok(Self {
                    backend: BackendImpl::Pull(stream),
                    kind: ActiveBackend::CallbackPull,
                    sample_rate,
                    burst_frames,
                })
            }
            ActiveBackend::BufferQueue => {
                let factory = hooks
                    .queue_factory
                    .as_ref()
                    .ok_or_else(|| Error::Backend("no buffer-queue device registered".into()))?;
                let stream = QueueStream::open(params, factory.as_ref(), source)?;
                let sample_rate = stream.sample_rate();
                let burst_frames = stream.burst_frames();
                Ok(Self {
                    backend: BackendImpl::Queue(stream),
                    kind: ActiveBackend::BufferQueue,
                    sample_rate,
                    burst_frames,
                })
            }
            ActiveBackend::BlockingWrite => {
                let factory = hooks
                    .write_factory
                    .as_ref()
                    .ok_or_else(|| Error::Backend("no blocking-write device registered".into()))?;
                let stream = WriteStream::open(params, factory.as_ref(), source)?;
                let sample_rate = stream.sample_rate();
                let burst_frames = stream.burst_frames();
                Ok(Self {
                    backend: BackendImpl::Write(stream),
                    kind: ActiveBackend::BlockingWrite,
                    sample_rate,
                    burst_frames,
                })
            }
        }
    }

    pub fn kind(&self) -> ActiveBackend {
        self.kind
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The backend's natural per-callback frame count.
    pub fn burst_frames(&self) -> usize {
        self.burst_frames
    }

    /// Begin delivery. Returns false when the backend refused to start.
    pub fn request_start(&mut self) -> bool {
        match &mut self.backend {
            BackendImpl::Pull(stream) => stream.request_start(),
            BackendImpl::Queue(stream) => stream.request_start(),
            BackendImpl::Write(stream) => stream.request_start(),
        }
    }

    pub fn request_stop(&mut self) {
        match &mut self.backend {
            BackendImpl::Pull(stream) => stream.request_stop(),
            BackendImpl::Queue(stream) => stream.request_stop(),
            BackendImpl::Write(stream) => stream.request_stop(),
        }
    }

    pub fn is_disconnected(&self) -> bool {
        match &self.backend {
            BackendImpl::Pull(stream) => stream.is_disconnected(),
            BackendImpl::Queue(stream) => stream.is_disconnected(),
            BackendImpl::Write(stream) => stream.is_disconnected(),
        }
    }
}
