//! # polytune-engine
//!
//! Real-time audio playback engine for a multi-format music player: a
//! pluggable decoder contract, a render worker that resamples and applies the
//! DSP chain into an interleaved-stereo ring, and a low-latency output
//! adapter spanning three backend shapes (callback-pull, buffer-queue,
//! blocking-write). Seeks, repeat-mode changes, stream reconfiguration and
//! decoder swaps never block the output callback.
//!
//! **Architecture:** condvar-driven render and seek workers around a
//! mutex-guarded decoder slot; the realtime path touches only the ring.

pub mod audio;
pub mod config;
pub mod decoder;
pub mod error;
pub mod playback;
pub(crate) mod util;

pub use config::{
    BackendPreference, BufferPreset, PerformanceMode, PipelineConfig, ResamplerPreference,
};
pub use decoder::registry::DecoderRegistry;
pub use decoder::{Capabilities, Decoder, OptionApplyPolicy, RepeatCapabilities, RepeatMode, TimelineMode};
pub use error::{Error, Result};
pub use playback::engine::core::{EngineState, OutputStats};
pub use playback::engine::{PlayerEngine, PlayerEngineBuilder};
pub use playback::fader::EndFadeCurve;
