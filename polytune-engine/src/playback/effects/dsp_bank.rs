//! Tracker-style DSP bank
//!
//! Four parameter-gated blocks processed in order: bass boost (shelf EQ on
//! the mono sum with DC removal), pseudo-surround (delayed mono echo shaped
//! by high/low shelves, added to the left and subtracted from the right),
//! Schroeder reverb driven by the 29 room presets, and a precision-limiting
//! bitcrush quantizer. Filter coefficients are recomputed whenever the stream
//! sample rate changes.

use crate::playback::effects::reverb_presets::{ReverbPreset, REVERB_PRESETS};

/// Parameter snapshot for one render chunk.
#[derive(Debug, Clone, Copy)]
pub struct DspBankParams {
    pub bass_enabled: bool,
    /// Boost amount index, 4..8 (smaller boosts harder)
    pub bass_depth: i32,
    /// Frequency range index, 5..21
    pub bass_range: i32,

    pub surround_enabled: bool,
    /// Echo level, 1..16
    pub surround_depth: i32,
    /// Echo delay, 5..45 ms (quantized to 5 ms steps)
    pub surround_delay_ms: i32,

    pub reverb_enabled: bool,
    /// Wet level, 1..16
    pub reverb_depth: i32,
    /// Room preset index, 0..28
    pub reverb_preset: i32,

    pub bitcrush_enabled: bool,
    /// Retained bits, 1..24
    pub bitcrush_bits: i32,
}

impl Default for DspBankParams {
    fn default() -> Self {
        Self {
            bass_enabled: false,
            bass_depth: 6,
            bass_range: 14,
            surround_enabled: false,
            surround_depth: 8,
            surround_delay_ms: 20,
            reverb_enabled: false,
            reverb_depth: 8,
            reverb_preset: 0,
            bitcrush_enabled: false,
            bitcrush_bits: 16,
        }
    }
}

/// One-pole shelving EQ design shared by the bass and surround blocks.
///
/// Returns `(a1, b0, b1)` for `y[n] = b0*x[n] + b1*x[n-1] + a1*y[n-1]`, with
/// the requested gains at DC, the transition frequency `fc`, and Nyquist.
fn shelf_eq(fc: f32, fs: f32, gain_dc: f32, gain_ft: f32, gain_pi: f32) -> (f32, f32, f32) {
    let wt = std::f32::consts::PI * fc / fs;
    let gain_pi2 = gain_pi * gain_pi;
    let gain_ft2 = gain_ft * gain_ft;
    let gain_dc2 = gain_dc * gain_dc;
    let mut quad = gain_pi2 + gain_dc2 - gain_ft2 * 2.0;

    let mut alpha = 0.0f32;
    if quad != 0.0 {
        let lambda = (gain_pi2 - gain_dc2) / quad;
        let sign = if lambda >= 0.0 { 1.0 } else { -1.0 };
        alpha = lambda - sign * ((lambda * lambda - 1.0).max(0.0)).sqrt();
    }

    let beta0 = 0.5 * ((gain_dc + gain_pi) + (gain_dc - gain_pi) * alpha);
    let beta1 = 0.5 * ((gain_dc - gain_pi) + (gain_dc + gain_pi) * alpha);
    let rho = (wt * 0.5 - std::f32::consts::FRAC_PI_4).sin()
        / (wt * 0.5 + std::f32::consts::FRAC_PI_4).sin();

    quad = 1.0 / (1.0 + rho * alpha);
    let b0 = (beta0 + rho * beta1) * quad;
    let b1 = (beta1 + rho * beta0) * quad;
    let a1 = -((rho + alpha) * quad);
    (a1, b0, b1)
}

/// DC-removal highpass: y[n] = x[n] - x[n-1] + R*y[n-1].
#[derive(Debug, Default, Clone, Copy)]
struct DcRemoval {
    x1: f32,
    y1: f32,
}

impl DcRemoval {
    const R: f32 = 1.0 - 1.0 / 512.0;

    fn process(&mut self, input: f32) -> f32 {
        let output = input - self.x1 + Self::R * self.y1;
        self.x1 = input;
        self.y1 = output;
        output
    }
}

#[derive(Debug, Default)]
struct BassState {
    dcr_left: DcRemoval,
    dcr_right: DcRemoval,
    filter_x1: f32,
    filter_y1: f32,
}

#[derive(Debug, Default)]
struct SurroundState {
    delay: Vec<f32>,
    write_pos: usize,
    configured_delay_ms: i32,
    configured_depth: i32,
    hp_coeffs: (f32, f32, f32),
    lp_coeffs: (f32, f32, f32),
    hp_x1: f32,
    hp_y1: f32,
    lp_y1: f32,
}

impl SurroundState {
    fn configure(&mut self, sample_rate: u32, delay_ms: i32, depth: i32) {
        let max_delay_frames = ((sample_rate as usize * 45) / 1000).max(16);
        if self.delay.len() != max_delay_frames {
            self.delay = vec![0.0; max_delay_frames];
        } else {
            self.delay.fill(0.0);
        }
        self.write_pos = 0;
        self.configured_delay_ms = delay_ms;
        self.configured_depth = depth;
        self.hp_x1 = 0.0;
        self.hp_y1 = 0.0;
        self.lp_y1 = 0.0;

        let fs = sample_rate.max(8000) as f32;
        let (hp_a1, mut hp_b0, mut hp_b1) = shelf_eq(200.0, fs, 0.0, 0.5, 1.0);
        let echo_level = depth as f32 / 32.0;
        hp_b0 *= echo_level;
        hp_b1 *= echo_level;
        self.hp_coeffs = (hp_a1, hp_b0, hp_b1);

        let (lp_a1, mut lp_b0, mut lp_b1) = shelf_eq(7000.0, fs, 1.0, 0.75, 0.0);
        lp_b0 *= 2.0;
        lp_b1 *= 2.0;
        self.lp_coeffs = (lp_a1, lp_b0, lp_b1);
    }
}

/// Feedback comb with a damping lowpass in the loop.
#[derive(Debug, Default)]
struct Comb {
    buffer: Vec<f32>,
    pos: usize,
    feedback: f32,
    damp: f32,
    filter_state: f32,
}

impl Comb {
    fn configure(&mut self, length: usize, feedback: f32, damp: f32) {
        self.buffer = vec![0.0; length.max(32)];
        self.pos = 0;
        self.feedback = feedback;
        self.damp = damp;
        self.filter_state = 0.0;
    }

    fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.pos];
        self.filter_state = output * (1.0 - self.damp) + self.filter_state * self.damp;
        self.buffer[self.pos] = input + self.filter_state * self.feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }
}

/// Classic all-pass diffuser.
#[derive(Debug, Default)]
struct AllPass {
    buffer: Vec<f32>,
    pos: usize,
}

impl AllPass {
    const GAIN: f32 = 0.5;

    fn configure(&mut self, length: usize) {
        self.buffer = vec![0.0; length.max(16)];
        self.pos = 0;
    }

    fn process(&mut self, input: f32) -> f32 {
        let buffered = self.buffer[self.pos];
        let output = buffered - input;
        self.buffer[self.pos] = input + buffered * Self::GAIN;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }
}

const COMBS_PER_CHANNEL: usize = 4;
const COMB_TUNING: [f32; COMBS_PER_CHANNEL] = [1.0, 1.13, 1.27, 1.43];
/// Right-channel decorrelation offset in samples (at the stream rate).
const STEREO_SPREAD: usize = 23;
const ALLPASS_LENGTHS: [usize; 2] = [225, 556];
/// Input attenuation into the comb bank.
const REVERB_SEND_SCALE: f32 = 0.2;

#[derive(Debug, Default)]
struct ReverbState {
    combs_left: [Comb; COMBS_PER_CHANNEL],
    combs_right: [Comb; COMBS_PER_CHANNEL],
    allpass_left: [AllPass; 2],
    allpass_right: [AllPass; 2],
    configured_preset: i32,
    configured_depth: i32,
    wet_base: f32,
    wet_gain: f32,
    dry_gain: f32,
}

fn millibels_to_linear(mb: i32) -> f32 {
    if mb <= -10_000 {
        0.0
    } else {
        10.0_f32.powf(mb as f32 / 2000.0)
    }
}

impl ReverbState {
    fn configure(&mut self, sample_rate: u32, preset_index: i32) {
        let clamped = preset_index.clamp(0, REVERB_PRESETS.len() as i32 - 1);
        let preset: &ReverbPreset = &REVERB_PRESETS[clamped as usize];
        let rate = sample_rate.max(8000) as f32;

        // Comb lengths grow from the preset's late-reverb delay; feedback is
        // the classic RT60 relation, damping follows the HF decay ratio.
        let base_seconds = preset.reverb_delay.clamp(0.005, 0.090);
        let damp = (1.0 - preset.decay_hf_ratio).clamp(0.0, 0.9);
        for (index, tuning) in COMB_TUNING.iter().enumerate() {
            let length = (rate * base_seconds * tuning) as usize;
            let feedback =
                0.001_f32.powf((length as f32 / rate) / preset.decay_time.max(0.01));
            self.combs_left[index].configure(length, feedback, damp);
            self.combs_right[index].configure(length + STEREO_SPREAD, feedback, damp);
        }
        let allpass_scale = rate / 44_100.0;
        for (index, length) in ALLPASS_LENGTHS.iter().enumerate() {
            let scaled = (*length as f32 * allpass_scale) as usize;
            self.allpass_left[index].configure(scaled);
            self.allpass_right[index].configure(scaled + STEREO_SPREAD);
        }

        self.wet_base = millibels_to_linear(preset.reverb_mb).min(1.0);
        self.configured_preset = clamped;
        self.configured_depth = -1;
    }

    fn configure_depth(&mut self, depth: i32) {
        let clamped = depth.clamp(1, 16);
        if clamped == self.configured_depth {
            return;
        }
        self.wet_gain = self.wet_base * clamped as f32 / 16.0;
        // Dry attenuation deepens with depth but only in proportion to how
        // loud the wet path actually is.
        let dry_vol = ((36 - clamped) / 2).clamp(8, 16) as f32 / 16.0;
        self.dry_gain = 1.0 - (1.0 - dry_vol) * self.wet_base;
        self.configured_depth = clamped;
    }
}

/// Stateful DSP bank. Lives under the decoder lock; one instance per source.
#[derive(Debug, Default)]
pub struct DspBank {
    configured_sample_rate: u32,
    bass: BassState,
    bass_coeffs: (f32, f32, f32),
    bass_coeffs_key: (i32, i32),
    surround: SurroundState,
    reverb: ReverbState,
}

impl DspBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn reset_for_sample_rate(&mut self, sample_rate: u32) {
        let safe_rate = sample_rate.max(8000);
        if safe_rate == self.configured_sample_rate {
            return;
        }
        self.configured_sample_rate = safe_rate;
        self.bass = BassState::default();
        self.bass_coeffs_key = (-1, -1);
        self.surround = SurroundState::default();
        self.reverb = ReverbState::default();
        self.reverb.configured_preset = -1;
    }

    /// Run the enabled blocks over one interleaved chunk.
    pub fn process(
        &mut self,
        buffer: &mut [f32],
        frames: usize,
        channels: usize,
        sample_rate: u32,
        params: &DspBankParams,
    ) {
        if frames == 0 || channels == 0 {
            return;
        }
        self.reset_for_sample_rate(sample_rate);

        if params.bass_enabled {
            self.apply_bass(buffer, frames, channels, params);
        }
        if params.surround_enabled {
            self.apply_surround(buffer, frames, channels, params);
        }
        if params.reverb_enabled {
            self.apply_reverb(buffer, frames, channels, params);
        }
        if params.bitcrush_enabled {
            apply_bitcrush(buffer, frames, channels, params.bitcrush_bits);
        }
    }

    fn bass_coefficients(&mut self, params: &DspBankParams) -> (f32, f32, f32) {
        let gain_index = params.bass_depth.clamp(4, 8);
        let range = params.bass_range.clamp(5, 21);
        if self.bass_coeffs_key == (gain_index, range) {
            return self.bass_coeffs;
        }
        let cutoff = (50 + (range + 2) * 20).clamp(60, 600) as f32;
        let gain_dc = 1.0 + (1.0 / 16.0) * ((0x300 >> gain_index) as f32);
        let (a1, mut b0, mut b1) = shelf_eq(
            cutoff,
            self.configured_sample_rate as f32,
            gain_dc,
            1.0,
            0.000_000_1,
        );
        if gain_index > 5 {
            let shift = (1 << (gain_index - 5)) as f32;
            b0 /= shift;
            b1 /= shift;
        }
        self.bass_coeffs = (a1, b0, b1);
        self.bass_coeffs_key = (gain_index, range);
        self.bass_coeffs
    }

    fn apply_bass(&mut self, buffer: &mut [f32], frames: usize, channels: usize, params: &DspBankParams) {
        let (a1, b0, b1) = self.bass_coefficients(params);
        let bass = &mut self.bass;

        if channels >= 2 {
            for frame in 0..frames {
                let base = frame * channels;
                let left = bass.dcr_left.process(buffer[base].clamp(-1.0, 1.0));
                let right = bass.dcr_right.process(buffer[base + 1].clamp(-1.0, 1.0));

                let mono = 0.5 * (left + right);
                let boost = b0 * mono + b1 * bass.filter_x1 + a1 * bass.filter_y1;
                bass.filter_x1 = mono;
                bass.filter_y1 = boost;

                buffer[base] = (left + boost).clamp(-1.0, 1.0);
                buffer[base + 1] = (right + boost).clamp(-1.0, 1.0);
            }
        } else {
            for sample in buffer.iter_mut().take(frames) {
                let centered = bass.dcr_left.process(sample.clamp(-1.0, 1.0));
                let boost = b0 * centered + b1 * bass.filter_x1 + a1 * bass.filter_y1;
                bass.filter_x1 = centered;
                bass.filter_y1 = boost;
                *sample = (centered + boost).clamp(-1.0, 1.0);
            }
        }
    }

    fn apply_surround(&mut self, buffer: &mut [f32], frames: usize, channels: usize, params: &DspBankParams) {
        if channels < 2 {
            return;
        }
        let delay_clamped = params.surround_delay_ms.clamp(5, 45);
        let delay_ms = 5 + (((delay_clamped - 5) + 2) / 5) * 5;
        let depth = params.surround_depth.clamp(1, 16);
        if self.surround.delay.is_empty()
            || delay_ms != self.surround.configured_delay_ms
            || depth != self.surround.configured_depth
        {
            self.surround.configure(self.configured_sample_rate, delay_ms, depth);
        }

        let surround = &mut self.surround;
        let (hp_a1, hp_b0, hp_b1) = surround.hp_coeffs;
        let (lp_a1, lp_b0, lp_b1) = surround.lp_coeffs;
        let delay_frames = ((self.configured_sample_rate as usize * delay_ms as usize) / 1000)
            .clamp(1, surround.delay.len().saturating_sub(1).max(1));

        for frame in 0..frames {
            let base = frame * channels;
            let left = buffer[base];
            let right = buffer[base + 1];

            let echo = surround.delay[surround.write_pos];
            surround.delay[surround.write_pos] = 0.5 * (left + right);

            let high_passed = hp_b0 * echo + hp_b1 * surround.hp_x1 + hp_a1 * surround.hp_y1;
            surround.hp_x1 = echo;
            let shaped = lp_b0 * high_passed + lp_b1 * surround.hp_y1 + lp_a1 * surround.lp_y1;
            surround.hp_y1 = high_passed;
            surround.lp_y1 = shaped;

            buffer[base] = (left + shaped).clamp(-1.0, 1.0);
            buffer[base + 1] = (right - shaped).clamp(-1.0, 1.0);

            surround.write_pos += 1;
            if surround.write_pos >= delay_frames {
                surround.write_pos = 0;
            }
        }
    }

    fn apply_reverb(&mut self, buffer: &mut [f32], frames: usize, channels: usize, params: &DspBankParams) {
        if channels < 2 {
            return;
        }
        let preset = params.reverb_preset.clamp(0, REVERB_PRESETS.len() as i32 - 1);
        if preset != self.reverb.configured_preset {
            self.reverb.configure(self.configured_sample_rate, preset);
        }
        self.reverb.configure_depth(params.reverb_depth);

        let reverb = &mut self.reverb;
        for frame in 0..frames {
            let base = frame * channels;
            let left = buffer[base];
            let right = buffer[base + 1];
            let send = 0.5 * (left + right) * REVERB_SEND_SCALE;

            let mut wet_left = 0.0;
            for comb in reverb.combs_left.iter_mut() {
                wet_left += comb.process(send);
            }
            let mut wet_right = 0.0;
            for comb in reverb.combs_right.iter_mut() {
                wet_right += comb.process(send);
            }
            for allpass in reverb.allpass_left.iter_mut() {
                wet_left = allpass.process(wet_left);
            }
            for allpass in reverb.allpass_right.iter_mut() {
                wet_right = allpass.process(wet_right);
            }

            buffer[base] = (left * reverb.dry_gain + wet_left * reverb.wet_gain).clamp(-1.0, 1.0);
            buffer[base + 1] =
                (right * reverb.dry_gain + wet_right * reverb.wet_gain).clamp(-1.0, 1.0);
        }
    }
}

const BITCRUSH_PRECISION_BITS: i32 = 24;

/// Quantize to `bits` of precision against a 24-bit fixed-point grid.
fn apply_bitcrush(buffer: &mut [f32], frames: usize, channels: usize, bits: i32) {
    let bits = bits.clamp(1, BITCRUSH_PRECISION_BITS);
    let mask = !((1u32 << (BITCRUSH_PRECISION_BITS - bits)) - 1);
    let full_scale = ((1i32 << BITCRUSH_PRECISION_BITS) - 1) as f32;
    for sample in buffer.iter_mut().take(frames * channels) {
        let clamped = sample.clamp(-1.0, 1.0);
        let fixed = (clamped * full_scale).round() as i32;
        let crushed = (fixed as u32 & mask) as i32;
        *sample = (crushed as f32 / full_scale).clamp(-1.0, 1.0);
    }
}
