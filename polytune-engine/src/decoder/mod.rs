//! Decoder contract consumed by the engine
//!
//! The engine never inspects decoder types. Everything it needs to pick a
//! seek, resample or repeat strategy is declared through capability bits and
//! the timeline mode; everything else is pass-through.

pub mod registry;
pub mod tone;

use bitflags::bitflags;
use std::path::Path;

bitflags! {
    /// Playback capabilities a decoder declares.
    ///
    /// The bits, not the decoder's identity, drive engine behavior: e.g.
    /// `DIRECT_SEEK` enables same-thread seeks, its absence forces the async
    /// scan-seek path.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        /// `seek()` works at all
        const SEEK = 1 << 0;
        /// `duration_seconds()` is trustworthy
        const RELIABLE_DURATION = 1 << 1;
        /// Repeat mode changes apply without reopening
        const LIVE_REPEAT_MODE = 1 << 2;
        /// Output sample rate is selectable
        const CUSTOM_SAMPLE_RATE = 1 << 3;
        /// Output sample rate can change mid-playback
        const LIVE_SAMPLE_RATE_CHANGE = 1 << 4;
        /// Decoder renders at one fixed rate
        const FIXED_SAMPLE_RATE = 1 << 5;
        /// `seek()` completes synchronously in bounded time
        const DIRECT_SEEK = 1 << 6;
    }

    /// Repeat modes a decoder supports natively.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RepeatCapabilities: u32 {
        const TRACK = 1 << 0;
        const LOOP_POINT = 1 << 1;
    }
}

/// How a decoder's reported position relates to frames rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimelineMode {
    #[default]
    Unknown,
    /// Position advances linearly with frames read
    ContinuousLinear,
    /// Position follows internal song events (pattern loops, order jumps)
    Discontinuous,
}

/// Engine-level repeat mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepeatMode {
    /// Play once, stop at end
    #[default]
    Off,
    /// Repeat the whole track set (advance subtunes when present)
    TrackSet,
    /// Repeat from the embedded loop marker
    LoopPoint,
    /// Repeat the current track/subtune only
    Current,
}

impl RepeatMode {
    /// Normalize a raw index; out-of-range values fall back to Off.
    pub fn from_index(index: i32) -> Self {
        match index {
            1 => Self::TrackSet,
            2 => Self::LoopPoint,
            3 => Self::Current,
            _ => Self::Off,
        }
    }

    pub fn index(self) -> i32 {
        match self {
            Self::Off => 0,
            Self::TrackSet => 1,
            Self::LoopPoint => 2,
            Self::Current => 3,
        }
    }
}

/// When a decoder option value takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptionApplyPolicy {
    /// Applies immediately on a live decoder
    #[default]
    Live,
    /// Requires the source to be reopened
    RequiresRestart,
}

/// The contract every audio source implementation satisfies.
///
/// `read` fills `buffer` with interleaved f32 samples at the decoder's native
/// channel count and sample rate and returns the number of frames produced.
/// A zero return means end-of-content, a spurious gap (loop-point wraps), or
/// starvation; the engine's repeat logic decides which.
pub trait Decoder: Send {
    fn open(&mut self, path: &Path) -> bool;
    fn close(&mut self);

    /// Read up to `frames` frames. `buffer` must hold at least
    /// `frames * channel_count()` samples.
    fn read(&mut self, buffer: &mut [f32], frames: usize) -> usize;

    fn seek(&mut self, seconds: f64);

    /// Duration in seconds; 0.0 when unknown.
    fn duration_seconds(&mut self) -> f64;

    fn sample_rate(&mut self) -> u32;
    fn channel_count(&mut self) -> usize;

    /// Channel count to display; may exceed the rendered (stereo-capped) count.
    fn display_channel_count(&mut self) -> usize {
        self.channel_count()
    }

    /// Decoder-reported playback position; negative when unknown.
    fn playback_position_seconds(&mut self) -> f64 {
        -1.0
    }

    fn playback_capabilities(&self) -> Capabilities {
        Capabilities::SEEK | Capabilities::RELIABLE_DURATION | Capabilities::LIVE_REPEAT_MODE
    }

    fn repeat_capabilities(&self) -> RepeatCapabilities {
        RepeatCapabilities::TRACK
    }

    fn timeline_mode(&self) -> TimelineMode {
        TimelineMode::Unknown
    }

    /// Rate the decoder renders at when `FIXED_SAMPLE_RATE` is set; 0 otherwise.
    fn fixed_sample_rate(&self) -> u32 {
        0
    }

    fn set_output_sample_rate(&mut self, _sample_rate: u32) {}
    fn set_repeat_mode(&mut self, _mode: RepeatMode) {}

    fn set_option(&mut self, _name: &str, _value: &str) {}
    fn option_apply_policy(&self, _name: &str) -> OptionApplyPolicy {
        OptionApplyPolicy::Live
    }

    fn subtune_count(&self) -> usize {
        1
    }
    fn current_subtune(&self) -> usize {
        0
    }
    fn select_subtune(&mut self, _index: usize) -> bool {
        false
    }

    // Metadata pass-through; no parsing happens in the engine.
    fn title(&mut self) -> String {
        String::new()
    }
    fn artist(&mut self) -> String {
        String::new()
    }
    fn bit_depth(&mut self) -> u32 {
        0
    }
    fn bit_depth_label(&mut self) -> String {
        "Unknown".to_string()
    }

    /// Stable decoder name used as the per-core option key.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_mode_index_round_trip() {
        for index in 0..4 {
            assert_eq!(RepeatMode::from_index(index).index(), index);
        }
        assert_eq!(RepeatMode::from_index(-3), RepeatMode::Off);
        assert_eq!(RepeatMode::from_index(17), RepeatMode::Off);
    }

    #[test]
    fn capability_bits_compose() {
        let caps = Capabilities::SEEK | Capabilities::DIRECT_SEEK;
        assert!(caps.contains(Capabilities::SEEK));
        assert!(caps.contains(Capabilities::DIRECT_SEEK));
        assert!(!caps.contains(Capabilities::RELIABLE_DURATION));
    }
}
