//! Fade envelopes
//!
//! Two disjoint envelopes exist. The end fade is duration/curve driven and is
//! applied by the render worker before the rest of the DSP chain. The
//! pause/resume fade is a frame-counted cosine ease between unity and a floor
//! gain, walked sample-by-sample in the output callback.

use crate::decoder::{Capabilities, RepeatMode};

/// End-fade curve shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndFadeCurve {
    #[default]
    Linear,
    /// Softer attenuation at fade start, stronger near the end: 1 - p^2
    EaseIn,
    /// Stronger attenuation near fade start: (1 - p)^2
    EaseOut,
}

impl EndFadeCurve {
    /// Normalize a raw index; out-of-range values fall back to Linear.
    pub fn from_index(index: i32) -> Self {
        match index {
            1 => Self::EaseIn,
            2 => Self::EaseOut,
            _ => Self::Linear,
        }
    }

    pub fn index(self) -> i32 {
        match self {
            Self::Linear => 0,
            Self::EaseIn => 1,
            Self::EaseOut => 2,
        }
    }
}

/// End-fade configuration snapshot.
#[derive(Debug, Clone, Copy)]
pub struct EndFadeConfig {
    /// Fade length in milliseconds; 0 disables the fade.
    pub duration_ms: i32,
    pub curve: EndFadeCurve,
    /// Apply even to decoders with a reliable duration.
    pub apply_to_all_tracks: bool,
}

/// Gain for the end fade at `position` seconds into a `duration`-second track.
///
/// Bypassed (unity) in LOOP_POINT mode, when the duration is unknown, when
/// the fade is disabled, and when the decoder declares a reliable duration
/// and the user did not opt into applying the fade to all tracks.
pub fn end_fade_gain(
    config: EndFadeConfig,
    position_seconds: f64,
    duration_seconds: f64,
    capabilities: Capabilities,
    repeat_mode: RepeatMode,
) -> f32 {
    if repeat_mode == RepeatMode::LoopPoint {
        return 1.0;
    }
    if !(duration_seconds > 0.0) || !duration_seconds.is_finite() {
        return 1.0;
    }
    if config.duration_ms <= 0 {
        return 1.0;
    }
    let fade_seconds = config.duration_ms as f64 / 1000.0;

    let reliable_duration = capabilities.contains(Capabilities::RELIABLE_DURATION);
    if reliable_duration && !config.apply_to_all_tracks {
        return 1.0;
    }

    let fade_start = (duration_seconds - fade_seconds).max(0.0);
    if position_seconds <= fade_start {
        return 1.0;
    }
    if position_seconds >= duration_seconds {
        return 0.0;
    }

    let progress = ((position_seconds - fade_start) / fade_seconds.max(0.001)).clamp(0.0, 1.0);
    let gain = match config.curve {
        EndFadeCurve::Linear => 1.0 - progress,
        EndFadeCurve::EaseIn => 1.0 - progress * progress,
        EndFadeCurve::EaseOut => {
            let inverted = 1.0 - progress;
            inverted * inverted
        }
    };
    (gain as f32).clamp(0.0, 1.0)
}

/// Frame-counted pause/resume fade envelope.
///
/// Walked once per output frame by the callback path. When a fade-out reaches
/// the floor gain the envelope latches `stop_pending` and holds the floor for
/// the rest of the chunk; the callback then flips the stream into its
/// terminal stop.
#[derive(Debug, Default)]
pub struct PauseResumeFade {
    total_frames: u32,
    processed_frames: u32,
    from_gain: f32,
    to_gain: f32,
    stop_pending: bool,
}

impl PauseResumeFade {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the envelope. `fade_in` ramps floor -> unity, otherwise
    /// unity -> floor. Duration clamps to 1..5000 ms, attenuation to 0..60 dB.
    pub fn begin(&mut self, fade_in: bool, stream_rate: u32, duration_ms: i32, attenuation_db: f32) {
        let safe_rate = stream_rate.max(1);
        let safe_duration_ms = duration_ms.clamp(1, 5000);
        let safe_attenuation_db = attenuation_db.clamp(0.0, 60.0);
        let total_frames =
            (((safe_rate as i64) * safe_duration_ms as i64) / 1000).max(1) as u32;
        let floor_gain = db_to_gain(-safe_attenuation_db).clamp(0.0, 1.0);

        self.total_frames = total_frames;
        self.processed_frames = 0;
        self.from_gain = if fade_in { floor_gain } else { 1.0 };
        self.to_gain = if fade_in { 1.0 } else { floor_gain };
        self.stop_pending = false;
    }

    /// Gain for the next frame; unity when no fade is active.
    pub fn next_gain(&mut self) -> f32 {
        if self.total_frames == 0 {
            return 1.0;
        }

        if self.processed_frames < self.total_frames {
            self.processed_frames += 1;
        }
        let t = (self.processed_frames as f32 / self.total_frames as f32).clamp(0.0, 1.0);
        let curve_t = 0.5 - 0.5 * (std::f32::consts::PI * t).cos();
        let gain = self.from_gain + (self.to_gain - self.from_gain) * curve_t;

        if self.processed_frames >= self.total_frames {
            if self.to_gain < 1.0 {
                // Fade-out reached the floor: hold it until the callback
                // flips the stream into terminal stop.
                self.stop_pending = true;
            } else {
                self.reset();
            }
        }
        gain.clamp(0.0, 1.0)
    }

    /// Consume the fade-out-complete latch.
    pub fn take_stop_pending(&mut self) -> bool {
        let pending = self.stop_pending;
        self.stop_pending = false;
        pending
    }

    pub fn reset(&mut self) {
        self.total_frames = 0;
        self.processed_frames = 0;
        self.from_gain = 1.0;
        self.to_gain = 1.0;
        self.stop_pending = false;
    }
}

/// Decibels to linear gain.
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(duration_ms: i32, curve: EndFadeCurve, apply_to_all: bool) -> EndFadeConfig {
        EndFadeConfig {
            duration_ms,
            curve,
            apply_to_all_tracks: apply_to_all,
        }
    }

    #[test]
    fn end_fade_unity_before_fade_start() {
        let gain = end_fade_gain(
            config(2000, EndFadeCurve::Linear, true),
            10.0,
            180.0,
            Capabilities::empty(),
            RepeatMode::Off,
        );
        assert_eq!(gain, 1.0);
    }

    #[test]
    fn end_fade_linear_midpoint() {
        let gain = end_fade_gain(
            config(2000, EndFadeCurve::Linear, true),
            179.0,
            180.0,
            Capabilities::empty(),
            RepeatMode::Off,
        );
        assert!((gain - 0.5).abs() < 0.01);
    }

    #[test]
    fn end_fade_bypassed_in_loop_point_mode() {
        let gain = end_fade_gain(
            config(2000, EndFadeCurve::Linear, true),
            179.9,
            180.0,
            Capabilities::empty(),
            RepeatMode::LoopPoint,
        );
        assert_eq!(gain, 1.0);
    }

    #[test]
    fn end_fade_bypassed_for_reliable_duration_without_opt_in() {
        let caps = Capabilities::RELIABLE_DURATION;
        assert_eq!(
            end_fade_gain(config(2000, EndFadeCurve::Linear, false), 179.9, 180.0, caps, RepeatMode::Off),
            1.0
        );
        assert!(
            end_fade_gain(config(2000, EndFadeCurve::Linear, true), 179.9, 180.0, caps, RepeatMode::Off)
                < 1.0
        );
    }

    #[test]
    fn end_fade_curves_order() {
        // At 50% progress: ease-in (0.75) > linear (0.5) > ease-out (0.25).
        let caps = Capabilities::empty();
        let ease_in =
            end_fade_gain(config(2000, EndFadeCurve::EaseIn, true), 179.0, 180.0, caps, RepeatMode::Off);
        let linear =
            end_fade_gain(config(2000, EndFadeCurve::Linear, true), 179.0, 180.0, caps, RepeatMode::Off);
        let ease_out =
            end_fade_gain(config(2000, EndFadeCurve::EaseOut, true), 179.0, 180.0, caps, RepeatMode::Off);
        assert!(ease_in > linear);
        assert!(linear > ease_out);
        assert!((ease_in - 0.75).abs() < 0.01);
        assert!((ease_out - 0.25).abs() < 0.01);
    }

    #[test]
    fn end_fade_zero_past_duration() {
        let gain = end_fade_gain(
            config(2000, EndFadeCurve::Linear, true),
            181.0,
            180.0,
            Capabilities::empty(),
            RepeatMode::Off,
        );
        assert_eq!(gain, 0.0);
    }

    #[test]
    fn pause_fade_walks_cosine_to_floor() {
        let mut fade = PauseResumeFade::new();
        // 100 ms at 48 kHz with 16 dB attenuation: 4800 frames to ~0.158.
        fade.begin(false, 48_000, 100, 16.0);
        let mut last = 1.0f32;
        let mut frames = 0;
        loop {
            let gain = fade.next_gain();
            assert!(gain <= last + 1e-6, "fade-out must be monotonic");
            last = gain;
            frames += 1;
            if fade.take_stop_pending() {
                break;
            }
            assert!(frames <= 4800, "floor not reached in expected frame count");
        }
        assert_eq!(frames, 4800);
        let floor = db_to_gain(-16.0);
        assert!((last - floor).abs() < 1e-3, "expected ~{floor}, got {last}");
    }

    #[test]
    fn resume_fade_ends_at_unity_and_disarms() {
        let mut fade = PauseResumeFade::new();
        fade.begin(true, 48_000, 10, 16.0); // 480 frames
        let mut gain = 0.0;
        for _ in 0..480 {
            gain = fade.next_gain();
        }
        assert!((gain - 1.0).abs() < 1e-6);
        assert!(!fade.take_stop_pending());
        // Envelope disarmed: subsequent frames are unity.
        assert_eq!(fade.next_gain(), 1.0);
    }

    #[test]
    fn inactive_envelope_is_unity() {
        let mut fade = PauseResumeFade::new();
        assert_eq!(fade.next_gain(), 1.0);
        assert!(!fade.take_stop_pending());
    }

    #[test]
    fn db_conversion() {
        assert!((db_to_gain(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_gain(-6.0) - 0.501).abs() < 0.01);
        assert!((db_to_gain(-16.0) - 0.158).abs() < 0.01);
    }
}
