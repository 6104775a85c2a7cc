//! Reverb environment presets
//!
//! 29 I3DL2-style room presets. Levels are in millibels, times in seconds.

/// One I3DL2-style reverb environment.
#[derive(Debug, Clone, Copy)]
pub struct ReverbPreset {
    pub room_mb: i32,
    pub room_hf_mb: i32,
    pub decay_time: f32,
    pub decay_hf_ratio: f32,
    pub reflections_mb: i32,
    pub reflections_delay: f32,
    pub reverb_mb: i32,
    pub reverb_delay: f32,
    pub diffusion: f32,
    pub density: f32,
}

pub const REVERB_PRESET_COUNT: usize = 29;

pub const REVERB_PRESETS: [ReverbPreset; REVERB_PRESET_COUNT] = [
    ReverbPreset { room_mb: -1000, room_hf_mb: -200, decay_time: 1.30, decay_hf_ratio: 0.90, reflections_mb: 0, reflections_delay: 0.002, reverb_mb: 0, reverb_delay: 0.010, diffusion: 100.0, density: 75.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -600, decay_time: 1.10, decay_hf_ratio: 0.83, reflections_mb: -400, reflections_delay: 0.005, reverb_mb: 500, reverb_delay: 0.010, diffusion: 100.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -600, decay_time: 1.30, decay_hf_ratio: 0.83, reflections_mb: -1000, reflections_delay: 0.010, reverb_mb: -200, reverb_delay: 0.020, diffusion: 100.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -600, decay_time: 1.50, decay_hf_ratio: 0.83, reflections_mb: -1600, reflections_delay: 0.020, reverb_mb: -1000, reverb_delay: 0.040, diffusion: 100.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -600, decay_time: 1.80, decay_hf_ratio: 0.70, reflections_mb: -1300, reflections_delay: 0.015, reverb_mb: -800, reverb_delay: 0.030, diffusion: 100.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -600, decay_time: 1.80, decay_hf_ratio: 0.70, reflections_mb: -2000, reflections_delay: 0.030, reverb_mb: -1400, reverb_delay: 0.060, diffusion: 100.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -100, decay_time: 1.49, decay_hf_ratio: 0.83, reflections_mb: -2602, reflections_delay: 0.007, reverb_mb: 200, reverb_delay: 0.011, diffusion: 100.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -6000, decay_time: 0.17, decay_hf_ratio: 0.10, reflections_mb: -1204, reflections_delay: 0.001, reverb_mb: 207, reverb_delay: 0.002, diffusion: 100.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -454, decay_time: 0.40, decay_hf_ratio: 0.83, reflections_mb: -1646, reflections_delay: 0.002, reverb_mb: 53, reverb_delay: 0.003, diffusion: 100.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -1200, decay_time: 1.49, decay_hf_ratio: 0.54, reflections_mb: -370, reflections_delay: 0.007, reverb_mb: 1030, reverb_delay: 0.011, diffusion: 100.0, density: 60.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -6000, decay_time: 0.50, decay_hf_ratio: 0.10, reflections_mb: -1376, reflections_delay: 0.003, reverb_mb: -1104, reverb_delay: 0.004, diffusion: 100.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -300, decay_time: 2.31, decay_hf_ratio: 0.64, reflections_mb: -711, reflections_delay: 0.012, reverb_mb: 83, reverb_delay: 0.017, diffusion: 100.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -476, decay_time: 4.32, decay_hf_ratio: 0.59, reflections_mb: -789, reflections_delay: 0.020, reverb_mb: -289, reverb_delay: 0.030, diffusion: 100.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -500, decay_time: 3.92, decay_hf_ratio: 0.70, reflections_mb: -1230, reflections_delay: 0.020, reverb_mb: -2, reverb_delay: 0.029, diffusion: 100.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: 0, decay_time: 2.91, decay_hf_ratio: 1.30, reflections_mb: -602, reflections_delay: 0.015, reverb_mb: -302, reverb_delay: 0.022, diffusion: 100.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -698, decay_time: 7.24, decay_hf_ratio: 0.33, reflections_mb: -1166, reflections_delay: 0.020, reverb_mb: 16, reverb_delay: 0.030, diffusion: 100.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -1000, decay_time: 10.05, decay_hf_ratio: 0.23, reflections_mb: -602, reflections_delay: 0.020, reverb_mb: 198, reverb_delay: 0.030, diffusion: 100.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -4000, decay_time: 0.30, decay_hf_ratio: 0.10, reflections_mb: -1831, reflections_delay: 0.002, reverb_mb: -1630, reverb_delay: 0.030, diffusion: 100.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -300, decay_time: 1.49, decay_hf_ratio: 0.59, reflections_mb: -1219, reflections_delay: 0.007, reverb_mb: 441, reverb_delay: 0.011, diffusion: 100.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -237, decay_time: 2.70, decay_hf_ratio: 0.79, reflections_mb: -1214, reflections_delay: 0.013, reverb_mb: 395, reverb_delay: 0.020, diffusion: 100.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -270, decay_time: 1.49, decay_hf_ratio: 0.86, reflections_mb: -1204, reflections_delay: 0.007, reverb_mb: -4, reverb_delay: 0.011, diffusion: 100.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -3300, decay_time: 1.49, decay_hf_ratio: 0.54, reflections_mb: -2560, reflections_delay: 0.162, reverb_mb: -613, reverb_delay: 0.088, diffusion: 79.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -800, decay_time: 1.49, decay_hf_ratio: 0.67, reflections_mb: -2273, reflections_delay: 0.007, reverb_mb: -2217, reverb_delay: 0.011, diffusion: 50.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -2500, decay_time: 1.49, decay_hf_ratio: 0.21, reflections_mb: -2780, reflections_delay: 0.300, reverb_mb: -2014, reverb_delay: 0.100, diffusion: 27.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -1000, decay_time: 1.49, decay_hf_ratio: 0.83, reflections_mb: -10000, reflections_delay: 0.061, reverb_mb: 500, reverb_delay: 0.025, diffusion: 100.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -2000, decay_time: 1.49, decay_hf_ratio: 0.50, reflections_mb: -2466, reflections_delay: 0.179, reverb_mb: -2514, reverb_delay: 0.100, diffusion: 21.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: 0, decay_time: 1.65, decay_hf_ratio: 1.50, reflections_mb: -1363, reflections_delay: 0.008, reverb_mb: -1153, reverb_delay: 0.012, diffusion: 100.0, density: 100.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -1000, decay_time: 2.81, decay_hf_ratio: 0.14, reflections_mb: 429, reflections_delay: 0.014, reverb_mb: 648, reverb_delay: 0.021, diffusion: 80.0, density: 60.0 },
    ReverbPreset { room_mb: -1000, room_hf_mb: -4000, decay_time: 1.49, decay_hf_ratio: 0.10, reflections_mb: -449, reflections_delay: 0.007, reverb_mb: 1700, reverb_delay: 0.011, diffusion: 100.0, density: 100.0 },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_table_is_complete_and_sane() {
        assert_eq!(REVERB_PRESETS.len(), 29);
        for preset in &REVERB_PRESETS {
            assert!(preset.decay_time > 0.0);
            assert!(preset.reverb_delay > 0.0);
            assert!(preset.diffusion > 0.0 && preset.diffusion <= 100.0);
        }
    }
}
