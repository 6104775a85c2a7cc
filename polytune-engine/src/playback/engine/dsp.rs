//! DSP and fade parameter latches
//!
//! All user-tunable audio parameters live in atomics so the render worker and
//! the callback path can snapshot them without taking a lock. Setters clamp
//! to the same ranges the DSP blocks expect.

use crate::playback::effects::dsp_bank::DspBankParams;
use crate::playback::engine::PlayerEngine;
use crate::playback::fader::{EndFadeConfig, EndFadeCurve};
use crate::util::AtomicF32;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

pub(crate) struct DspSettings {
    master_gain_db: AtomicF32,
    song_gain_db: AtomicF32,
    plugin_gain_db: AtomicF32,
    force_mono: AtomicBool,
    limiter_enabled: AtomicBool,

    mute_left: AtomicBool,
    mute_right: AtomicBool,
    solo_left: AtomicBool,
    solo_right: AtomicBool,

    bass_enabled: AtomicBool,
    bass_depth: AtomicI32,
    bass_range: AtomicI32,
    surround_enabled: AtomicBool,
    surround_depth: AtomicI32,
    surround_delay_ms: AtomicI32,
    reverb_enabled: AtomicBool,
    reverb_depth: AtomicI32,
    reverb_preset: AtomicI32,
    bitcrush_enabled: AtomicBool,
    bitcrush_bits: AtomicI32,

    end_fade_apply_all: AtomicBool,
    end_fade_duration_ms: AtomicI32,
    end_fade_curve: AtomicI32,
}

impl DspSettings {
    pub fn new() -> Self {
        Self {
            master_gain_db: AtomicF32::new(0.0),
            song_gain_db: AtomicF32::new(0.0),
            plugin_gain_db: AtomicF32::new(0.0),
            force_mono: AtomicBool::new(false),
            limiter_enabled: AtomicBool::new(true),
            mute_left: AtomicBool::new(false),
            mute_right: AtomicBool::new(false),
            solo_left: AtomicBool::new(false),
            solo_right: AtomicBool::new(false),
            bass_enabled: AtomicBool::new(false),
            bass_depth: AtomicI32::new(6),
            bass_range: AtomicI32::new(14),
            surround_enabled: AtomicBool::new(false),
            surround_depth: AtomicI32::new(8),
            surround_delay_ms: AtomicI32::new(20),
            reverb_enabled: AtomicBool::new(false),
            reverb_depth: AtomicI32::new(8),
            reverb_preset: AtomicI32::new(0),
            bitcrush_enabled: AtomicBool::new(false),
            bitcrush_bits: AtomicI32::new(16),
            end_fade_apply_all: AtomicBool::new(false),
            end_fade_duration_ms: AtomicI32::new(0),
            end_fade_curve: AtomicI32::new(0),
        }
    }

    pub fn gain_snapshot(&self) -> (f32, f32, f32) {
        (
            self.master_gain_db.load(),
            self.song_gain_db.load(),
            self.plugin_gain_db.load(),
        )
    }

    pub fn routing_snapshot(&self) -> (bool, bool, bool, bool) {
        (
            self.mute_left.load(Ordering::Relaxed),
            self.mute_right.load(Ordering::Relaxed),
            self.solo_left.load(Ordering::Relaxed),
            self.solo_right.load(Ordering::Relaxed),
        )
    }

    pub fn force_mono(&self) -> bool {
        self.force_mono.load(Ordering::Relaxed)
    }

    pub fn limiter_enabled(&self) -> bool {
        self.limiter_enabled.load(Ordering::Relaxed)
    }

    pub fn bank_params(&self) -> DspBankParams {
        DspBankParams {
            bass_enabled: self.bass_enabled.load(Ordering::Relaxed),
            bass_depth: self.bass_depth.load(Ordering::Relaxed),
            bass_range: self.bass_range.load(Ordering::Relaxed),
            surround_enabled: self.surround_enabled.load(Ordering::Relaxed),
            surround_depth: self.surround_depth.load(Ordering::Relaxed),
            surround_delay_ms: self.surround_delay_ms.load(Ordering::Relaxed),
            reverb_enabled: self.reverb_enabled.load(Ordering::Relaxed),
            reverb_depth: self.reverb_depth.load(Ordering::Relaxed),
            reverb_preset: self.reverb_preset.load(Ordering::Relaxed),
            bitcrush_enabled: self.bitcrush_enabled.load(Ordering::Relaxed),
            bitcrush_bits: self.bitcrush_bits.load(Ordering::Relaxed),
        }
    }

    pub fn end_fade_config(&self) -> EndFadeConfig {
        EndFadeConfig {
            duration_ms: self.end_fade_duration_ms.load(Ordering::Relaxed),
            curve: EndFadeCurve::from_index(self.end_fade_curve.load(Ordering::Relaxed)),
            apply_to_all_tracks: self.end_fade_apply_all.load(Ordering::Relaxed),
        }
    }
}

impl PlayerEngine {
    pub fn set_master_gain_db(&self, gain_db: f32) {
        self.shared.dsp.master_gain_db.store(gain_db);
    }

    pub fn master_gain_db(&self) -> f32 {
        self.shared.dsp.master_gain_db.load()
    }

    pub fn set_song_gain_db(&self, gain_db: f32) {
        self.shared.dsp.song_gain_db.store(gain_db);
    }

    pub fn song_gain_db(&self) -> f32 {
        self.shared.dsp.song_gain_db.load()
    }

    pub fn set_plugin_gain_db(&self, gain_db: f32) {
        self.shared.dsp.plugin_gain_db.store(gain_db);
    }

    pub fn plugin_gain_db(&self) -> f32 {
        self.shared.dsp.plugin_gain_db.load()
    }

    pub fn set_force_mono(&self, enabled: bool) {
        self.shared.dsp.force_mono.store(enabled, Ordering::Relaxed);
    }

    pub fn force_mono(&self) -> bool {
        self.shared.dsp.force_mono()
    }

    pub fn set_output_limiter_enabled(&self, enabled: bool) {
        self.shared.dsp.limiter_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Mute one output channel (0 = left, 1 = right).
    pub fn set_master_channel_mute(&self, channel_index: usize, enabled: bool) {
        match channel_index {
            0 => self.shared.dsp.mute_left.store(enabled, Ordering::Relaxed),
            1 => self.shared.dsp.mute_right.store(enabled, Ordering::Relaxed),
            _ => {}
        }
    }

    pub fn master_channel_mute(&self, channel_index: usize) -> bool {
        match channel_index {
            0 => self.shared.dsp.mute_left.load(Ordering::Relaxed),
            1 => self.shared.dsp.mute_right.load(Ordering::Relaxed),
            _ => false,
        }
    }

    /// Solo one output channel (0 = left, 1 = right). Solo overrides mute.
    pub fn set_master_channel_solo(&self, channel_index: usize, enabled: bool) {
        match channel_index {
            0 => self.shared.dsp.solo_left.store(enabled, Ordering::Relaxed),
            1 => self.shared.dsp.solo_right.store(enabled, Ordering::Relaxed),
            _ => {}
        }
    }

    pub fn master_channel_solo(&self, channel_index: usize) -> bool {
        match channel_index {
            0 => self.shared.dsp.solo_left.load(Ordering::Relaxed),
            1 => self.shared.dsp.solo_right.load(Ordering::Relaxed),
            _ => false,
        }
    }

    pub fn set_dsp_bass_enabled(&self, enabled: bool) {
        self.shared.dsp.bass_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn set_dsp_bass_depth(&self, depth: i32) {
        self.shared.dsp.bass_depth.store(depth.clamp(4, 8), Ordering::Relaxed);
    }

    pub fn set_dsp_bass_range(&self, range: i32) {
        self.shared.dsp.bass_range.store(range.clamp(5, 21), Ordering::Relaxed);
    }

    pub fn set_dsp_surround_enabled(&self, enabled: bool) {
        self.shared.dsp.surround_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn set_dsp_surround_depth(&self, depth: i32) {
        self.shared.dsp.surround_depth.store(depth.clamp(1, 16), Ordering::Relaxed);
    }

    pub fn set_dsp_surround_delay_ms(&self, delay_ms: i32) {
        self.shared
            .dsp
            .surround_delay_ms
            .store(delay_ms.clamp(5, 45), Ordering::Relaxed);
    }

    pub fn set_dsp_reverb_enabled(&self, enabled: bool) {
        self.shared.dsp.reverb_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn set_dsp_reverb_depth(&self, depth: i32) {
        self.shared.dsp.reverb_depth.store(depth.clamp(1, 16), Ordering::Relaxed);
    }

    pub fn set_dsp_reverb_preset(&self, preset: i32) {
        self.shared.dsp.reverb_preset.store(preset.clamp(0, 28), Ordering::Relaxed);
    }

    pub fn set_dsp_bitcrush_enabled(&self, enabled: bool) {
        self.shared.dsp.bitcrush_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn set_dsp_bitcrush_bits(&self, bits: i32) {
        self.shared.dsp.bitcrush_bits.store(bits.clamp(1, 24), Ordering::Relaxed);
    }

    pub fn dsp_bank_params(&self) -> DspBankParams {
        self.shared.dsp.bank_params()
    }

    pub fn set_end_fade_apply_to_all_tracks(&self, enabled: bool) {
        self.shared.dsp.end_fade_apply_all.store(enabled, Ordering::Relaxed);
    }

    pub fn set_end_fade_duration_ms(&self, duration_ms: i32) {
        self.shared
            .dsp
            .end_fade_duration_ms
            .store(duration_ms.clamp(100, 120_000), Ordering::Relaxed);
    }

    pub fn set_end_fade_curve(&self, curve: EndFadeCurve) {
        self.shared.dsp.end_fade_curve.store(curve.index(), Ordering::Relaxed);
    }

    pub fn end_fade_config(&self) -> EndFadeConfig {
        self.shared.dsp.end_fade_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_neutral() {
        let settings = DspSettings::new();
        assert_eq!(settings.gain_snapshot(), (0.0, 0.0, 0.0));
        assert!(!settings.force_mono());
        assert!(settings.limiter_enabled());
        let bank = settings.bank_params();
        assert!(!bank.bass_enabled);
        assert!(!bank.surround_enabled);
        assert!(!bank.reverb_enabled);
        assert!(!bank.bitcrush_enabled);
        // End fade is disabled until configured.
        assert_eq!(settings.end_fade_config().duration_ms, 0);
    }
}
