//! Engine shared state
//!
//! One `EngineShared` instance is owned by the facade and referenced by the
//! render worker, the seek worker, and the output backends. Mutex discipline:
//! `decoder` guards the decoder slot and all per-source pipeline state and is
//! never held across a ring append; `ring` guards the ring only and is the
//! only lock the realtime callback takes (besides the tiny fade envelope
//! lock); `seek` guards the single-slot seek request; `stream` guards the
//! output stream and is always acquired before `decoder` when both are
//! needed. High-frequency scalars are atomics with relaxed ordering.

use crate::audio::output::DeviceHooks;
use crate::audio::resampler::ResamplerState;
use crate::config::BufferPreset;
use crate::decoder::registry::DecoderRegistry;
use crate::decoder::{Decoder, RepeatMode};
use crate::playback::effects::dsp_bank::DspBank;
use crate::playback::effects::OutputLimiter;
use crate::playback::engine::dsp::DspSettings;
use crate::playback::fader::PauseResumeFade;
use crate::playback::ring_buffer::{RenderRing, RingState};
use crate::playback::timeline::TimelineState;
use crate::playback::visualization::VisualizationTap;
use crate::util::{AtomicF32, AtomicF64};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use crate::audio::output::StreamParams;
use crate::audio::output::OutputStream;

/// Coarse engine state derived from the flag set (diagnostics only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Playing,
    SeekingDirect,
    SeekingAsync,
    Paused,
    TerminalStopPending,
    StreamRebuildPending,
}

/// Decoder slot plus everything that renders from it. Guarded as one unit by
/// the decoder mutex.
pub(crate) struct DecoderSlot {
    pub decoder: Option<Box<dyn Decoder>>,
    /// The decoder's native output rate, cached at open/reconfigure.
    pub render_sample_rate: u32,
    pub resampler: ResamplerState,
    pub timeline: TimelineState,
    pub dsp_bank: DspBank,
    pub limiter: OutputLimiter,
    /// Cached per-decoder output sample rate requests, keyed by decoder name.
    pub core_sample_rates: HashMap<String, u32>,
    /// Cached per-decoder option values, keyed by decoder name.
    pub core_options: HashMap<String, HashMap<String, String>>,
}

impl DecoderSlot {
    fn new() -> Self {
        Self {
            decoder: None,
            render_sample_rate: 48_000,
            resampler: ResamplerState::new(),
            timeline: TimelineState::new(),
            dsp_bank: DspBank::new(),
            limiter: OutputLimiter::new(),
            core_sample_rates: HashMap::new(),
            core_options: HashMap::new(),
        }
    }

    /// The configured output rate for a decoder name: the cached per-core
    /// request when present, otherwise the stream rate.
    pub fn resolve_output_sample_rate(&self, core_name: &str, stream_rate: u32) -> u32 {
        if let Some(rate) = self.core_sample_rates.get(core_name) {
            if *rate > 0 {
                return *rate;
            }
        }
        if stream_rate > 0 {
            stream_rate
        } else {
            48_000
        }
    }
}

/// Ring plus the render worker's stop flag (same mutex so the condvar
/// predicate sees both consistently).
pub(crate) struct RingShared {
    pub ring: RenderRing,
    pub stop: bool,
}

/// Single-slot seek request; a new request overwrites the pending one.
pub(crate) struct SeekShared {
    pub pending: Option<SeekRequest>,
    pub stop: bool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SeekRequest {
    pub target_seconds: f64,
    pub decoder_serial: u64,
}

/// Output stream slot.
pub(crate) struct StreamSlot {
    pub output: Option<OutputStream>,
    pub params: StreamParams,
    /// One burst of silence is injected the first time a stream is built.
    pub startup_preroll_pending: bool,
}

pub(crate) struct EngineShared {
    pub registry: std::sync::Arc<DecoderRegistry>,
    pub hooks: DeviceHooks,

    pub decoder: Mutex<DecoderSlot>,
    pub ring: Mutex<RingShared>,
    pub render_cv: Condvar,
    pub seek: Mutex<SeekShared>,
    pub seek_cv: Condvar,
    pub stream: Mutex<StreamSlot>,

    pub is_playing: AtomicBool,
    pub repeat_mode: AtomicI32,
    pub position_seconds: AtomicF64,
    pub cached_duration_seconds: AtomicF64,
    pub natural_end_pending: AtomicBool,
    /// Bumped on every decoder replacement; stale background work is dropped.
    pub decoder_serial: AtomicU64,

    pub seek_in_progress: AtomicBool,
    pub seek_abort: AtomicBool,
    pub stop_stream_after_seek: AtomicBool,
    pub direct_seek_active: AtomicBool,

    pub render_terminal_stop_pending: AtomicBool,
    pub stream_needs_rebuild: AtomicBool,
    pub resume_after_rebuild: AtomicBool,
    pub stream_sample_rate: AtomicU32,

    /// Mirror of the pipeline config's resampler preference, readable without
    /// the stream lock.
    pub resampler_preference: AtomicI32,

    pub chunk_frames: AtomicUsize,
    pub target_frames: AtomicUsize,
    pub recovery_boost_until_ns: AtomicU64,
    pub callback_count: AtomicU64,
    pub underrun_count: AtomicU64,
    pub underrun_frames: AtomicU64,
    pub last_underrun_log_ns: AtomicU64,

    pub fade: Mutex<PauseResumeFade>,
    pub pending_pause_fade: AtomicBool,
    pub pending_pause_fade_ms: AtomicI32,
    pub pending_pause_fade_db: AtomicF32,
    pub pending_resume_fade: AtomicBool,
    pub pending_resume_fade_ms: AtomicI32,
    pub pending_resume_fade_db: AtomicF32,

    pub dsp: DspSettings,
    pub visualization: VisualizationTap,
}

impl EngineShared {
    pub fn new(
        registry: std::sync::Arc<DecoderRegistry>,
        hooks: DeviceHooks,
        params: StreamParams,
    ) -> Self {
        let preset = params.config.buffer_preset;
        let resampler_index = match params.config.resampler {
            crate::config::ResamplerPreference::BuiltIn => 1,
            crate::config::ResamplerPreference::HighQuality => 2,
        };
        Self {
            registry,
            hooks,
            decoder: Mutex::new(DecoderSlot::new()),
            ring: Mutex::new(RingShared {
                ring: RenderRing::new(),
                stop: false,
            }),
            render_cv: Condvar::new(),
            seek: Mutex::new(SeekShared {
                pending: None,
                stop: false,
            }),
            seek_cv: Condvar::new(),
            stream: Mutex::new(StreamSlot {
                output: None,
                params,
                startup_preroll_pending: true,
            }),
            is_playing: AtomicBool::new(false),
            repeat_mode: AtomicI32::new(0),
            position_seconds: AtomicF64::new(0.0),
            cached_duration_seconds: AtomicF64::new(0.0),
            natural_end_pending: AtomicBool::new(false),
            decoder_serial: AtomicU64::new(0),
            seek_in_progress: AtomicBool::new(false),
            seek_abort: AtomicBool::new(false),
            stop_stream_after_seek: AtomicBool::new(false),
            direct_seek_active: AtomicBool::new(false),
            render_terminal_stop_pending: AtomicBool::new(false),
            stream_needs_rebuild: AtomicBool::new(false),
            resume_after_rebuild: AtomicBool::new(false),
            stream_sample_rate: AtomicU32::new(48_000),
            resampler_preference: AtomicI32::new(resampler_index),
            chunk_frames: AtomicUsize::new(preset.chunk_frames()),
            target_frames: AtomicUsize::new(preset.target_frames()),
            recovery_boost_until_ns: AtomicU64::new(0),
            callback_count: AtomicU64::new(0),
            underrun_count: AtomicU64::new(0),
            underrun_frames: AtomicU64::new(0),
            last_underrun_log_ns: AtomicU64::new(0),
            fade: Mutex::new(PauseResumeFade::new()),
            pending_pause_fade: AtomicBool::new(false),
            pending_pause_fade_ms: AtomicI32::new(0),
            pending_pause_fade_db: AtomicF32::new(0.0),
            pending_resume_fade: AtomicBool::new(false),
            pending_resume_fade_ms: AtomicI32::new(0),
            pending_resume_fade_db: AtomicF32::new(0.0),
            dsp: DspSettings::new(),
            visualization: VisualizationTap::new(),
        }
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        RepeatMode::from_index(self.repeat_mode.load(Ordering::Relaxed))
    }

    pub fn playing(&self) -> bool {
        self.is_playing.load(Ordering::Relaxed)
    }

    pub fn seeking(&self) -> bool {
        self.seek_in_progress.load(Ordering::Relaxed)
    }

    pub fn ring_frames(&self) -> usize {
        self.ring.lock().unwrap().ring.frames_available()
    }

    /// Clear the ring and the terminal-stop latch together.
    pub fn clear_ring(&self) {
        let mut ring = self.ring.lock().unwrap();
        ring.ring.clear();
        self.render_terminal_stop_pending.store(false, Ordering::Relaxed);
    }

    pub fn append_ring(&self, data: &[f32], frames: usize, channels: usize) {
        self.ring.lock().unwrap().ring.append(data, frames, channels);
    }

    pub fn notify_render(&self) {
        self.render_cv.notify_one();
    }

    pub fn notify_render_all(&self) {
        self.render_cv.notify_all();
    }

    pub fn update_ring_tuning(&self, preset: BufferPreset) {
        self.chunk_frames.store(preset.chunk_frames(), Ordering::Relaxed);
        self.target_frames.store(preset.target_frames(), Ordering::Relaxed);
        tracing::debug!(
            preset = ?preset,
            chunk = preset.chunk_frames(),
            target = preset.target_frames(),
            "render ring tuning updated"
        );
    }

    /// Coarse state summary for diagnostics.
    pub fn engine_state(&self) -> EngineState {
        if self.stream_needs_rebuild.load(Ordering::Relaxed) {
            return EngineState::StreamRebuildPending;
        }
        if self.direct_seek_active.load(Ordering::Relaxed) {
            return EngineState::SeekingDirect;
        }
        if self.seeking() {
            return EngineState::SeekingAsync;
        }
        if self.render_terminal_stop_pending.load(Ordering::Relaxed) {
            return EngineState::TerminalStopPending;
        }
        if self.playing() {
            return EngineState::Playing;
        }
        let has_source = self
            .decoder
            .try_lock()
            .map(|slot| slot.decoder.is_some())
            .unwrap_or(true);
        if has_source && self.position_seconds.load() > 0.0 {
            EngineState::Paused
        } else {
            EngineState::Idle
        }
    }

    /// Coarse ring state summary for diagnostics.
    pub fn ring_state(&self) -> RingState {
        let ring = self.ring.lock().unwrap();
        ring.ring.state(
            self.playing(),
            self.target_frames.load(Ordering::Relaxed),
            self.render_terminal_stop_pending.load(Ordering::Relaxed),
        )
    }
}

/// Output delivery statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputStats {
    pub callbacks: u64,
    pub underruns: u64,
    pub underrun_frames: u64,
}
