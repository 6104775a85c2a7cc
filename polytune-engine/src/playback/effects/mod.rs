//! Render-chunk effects
//!
//! Applied by the render worker in a fixed order: end-fade gain, three-stage
//! gain, master channel routing, the DSP bank, mono downmix, then the output
//! limiter. Every stage is bit-exact bypass when disabled or at unity.

pub mod dsp_bank;
pub mod reverb_presets;

use crate::playback::fader::db_to_gain;

/// Three-stage gain: master plus (song if nonzero, else plugin), converted to
/// linear and multiplied with an extra per-chunk gain (the end fade).
/// Unity is a fast-path bypass.
pub fn apply_gain(
    buffer: &mut [f32],
    frames: usize,
    channels: usize,
    master_db: f32,
    song_db: f32,
    plugin_db: f32,
    extra_gain: f32,
) {
    let master_gain = db_to_gain(master_db);
    // Song gain overrides plugin gain when not at neutral.
    let secondary_gain = if song_db != 0.0 {
        db_to_gain(song_db)
    } else {
        db_to_gain(plugin_db)
    };
    let base_gain = master_gain * secondary_gain * extra_gain.clamp(0.0, 1.0);

    if base_gain == 1.0 {
        return;
    }
    for sample in buffer.iter_mut().take(frames * channels) {
        *sample *= base_gain;
    }
}

/// Master channel mute/solo routing. Solo overrides mute; both channels
/// enabled is a bypass.
pub fn apply_channel_routing(
    buffer: &mut [f32],
    frames: usize,
    channels: usize,
    mute_left: bool,
    mute_right: bool,
    solo_left: bool,
    solo_right: bool,
) {
    if channels < 2 {
        return;
    }
    let any_solo = solo_left || solo_right;
    let left_enabled = if any_solo { solo_left } else { !mute_left };
    let right_enabled = if any_solo { solo_right } else { !mute_right };

    if left_enabled && right_enabled {
        return;
    }
    for frame in 0..frames {
        let base = frame * channels;
        if !left_enabled {
            buffer[base] = 0.0;
        }
        if !right_enabled {
            buffer[base + 1] = 0.0;
        }
    }
}

/// Average L and R into both channels when force-mono is enabled.
pub fn apply_mono_downmix(buffer: &mut [f32], frames: usize, channels: usize, force_mono: bool) {
    if !force_mono || channels != 2 {
        return;
    }
    for frame in 0..frames {
        let mono = (buffer[frame * 2] + buffer[frame * 2 + 1]) * 0.5;
        buffer[frame * 2] = mono;
        buffer[frame * 2 + 1] = mono;
    }
}

const SOFT_CLIP_START: f32 = 0.92;
const SOFT_CLIP_DRIVE: f32 = 1.45;
const LIMITER_ATTACK: f32 = 0.45;
const LIMITER_RELEASE: f32 = 0.04;
const LIMITER_GAIN_FLOOR: f32 = 0.1;

/// Peak-based output limiter with a soft-knee tanh saturator.
///
/// Holds its gain envelope across chunks. The soft-clip/hard-clamp stage
/// always runs; the gain follower only when enabled.
#[derive(Debug)]
pub struct OutputLimiter {
    gain: f32,
}

impl Default for OutputLimiter {
    fn default() -> Self {
        Self { gain: 1.0 }
    }
}

impl OutputLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.gain = 1.0;
    }

    pub fn process(&mut self, buffer: &mut [f32], frames: usize, channels: usize, enabled: bool) {
        if frames == 0 || channels == 0 {
            return;
        }
        let total_samples = frames * channels;
        let mut limiter_gain = 1.0f32;
        if enabled {
            let mut peak = 0.0f32;
            for sample in buffer.iter().take(total_samples) {
                peak = peak.max(sample.abs());
            }
            let target_gain = if peak > 1.0 { 1.0 / peak } else { 1.0 };
            let coefficient = if target_gain < self.gain {
                LIMITER_ATTACK
            } else {
                LIMITER_RELEASE
            };
            self.gain += (target_gain - self.gain) * coefficient;
            self.gain = self.gain.clamp(LIMITER_GAIN_FLOOR, 1.0);
            limiter_gain = self.gain;
        } else {
            self.gain = 1.0;
        }

        let tanh_norm = SOFT_CLIP_DRIVE.tanh();
        for sample in buffer.iter_mut().take(total_samples) {
            let mut value = *sample * limiter_gain;
            if value.abs() > SOFT_CLIP_START {
                value = (value * SOFT_CLIP_DRIVE).tanh() / tanh_norm;
            }
            *sample = value.clamp(-1.0, 1.0);
        }
    }
}
