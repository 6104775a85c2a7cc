//! Visualization tap
//!
//! Read-only taps fed from the output callback: a 256-point waveform pair,
//! RMS VU levels, a scope history ring, and 256 log-spaced spectrum bars from
//! a 2048-point FFT. Updates only run while a reader has polled within the
//! last 750 ms, so idle playback costs nothing. Readers take the
//! visualization mutex only; the tap never touches the decoder lock.

use crate::util::monotonic_ns;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const WAVEFORM_SIZE: usize = 256;
const FFT_SIZE: usize = 2048;
const SPECTRUM_BINS: usize = 256;
const MIN_DISPLAY_HZ: f32 = 35.0;
const SCOPE_HISTORY_SIZE: usize = 8192;
const MONO_HISTORY_SIZE: usize = 4096;
/// Updates stop this long after the last reader poll.
const DEMAND_WINDOW_NS: u64 = 750_000_000;

struct VisualizationState {
    scope_left: Vec<f32>,
    scope_right: Vec<f32>,
    scope_write_index: usize,
    mono_history: Vec<f32>,
    mono_write_index: usize,
    waveform_left: [f32; WAVEFORM_SIZE],
    waveform_right: [f32; WAVEFORM_SIZE],
    vu_levels: [f32; 2],
    vu_levels_prev: [f32; 2],
    bars: Vec<f32>,
    bars_prev: Vec<f32>,
    frames_since_analysis: usize,
    last_callback_frames: usize,
    last_callback_ns: u64,
}

impl Default for VisualizationState {
    fn default() -> Self {
        Self {
            scope_left: vec![0.0; SCOPE_HISTORY_SIZE],
            scope_right: vec![0.0; SCOPE_HISTORY_SIZE],
            scope_write_index: 0,
            mono_history: vec![0.0; MONO_HISTORY_SIZE],
            mono_write_index: 0,
            waveform_left: [0.0; WAVEFORM_SIZE],
            waveform_right: [0.0; WAVEFORM_SIZE],
            vu_levels: [0.0; 2],
            vu_levels_prev: [0.0; 2],
            bars: vec![0.0; SPECTRUM_BINS],
            bars_prev: vec![0.0; SPECTRUM_BINS],
            frames_since_analysis: 0,
            last_callback_frames: 0,
            last_callback_ns: 0,
        }
    }
}

/// Demand-gated output tap.
pub struct VisualizationTap {
    state: Mutex<VisualizationState>,
    last_request_ns: AtomicU64,
    channel_count: AtomicUsize,
    fft: Arc<dyn Fft<f32>>,
}

impl VisualizationTap {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        Self {
            state: Mutex::new(VisualizationState::default()),
            last_request_ns: AtomicU64::new(0),
            channel_count: AtomicUsize::new(2),
            fft: planner.plan_fft_forward(FFT_SIZE),
        }
    }

    fn mark_requested(&self) {
        self.last_request_ns.store(monotonic_ns(), Ordering::Relaxed);
    }

    /// True while a reader has polled within the demand window.
    pub fn should_update(&self) -> bool {
        let last_request = self.last_request_ns.load(Ordering::Relaxed);
        if last_request == 0 {
            return false;
        }
        monotonic_ns().saturating_sub(last_request) <= DEMAND_WINDOW_NS
    }

    /// Feed one output-callback chunk. Call only when `should_update()`.
    pub fn update_from_callback(
        &self,
        buffer: &[f32],
        frames: usize,
        channels: usize,
        sample_rate: u32,
    ) {
        if buffer.is_empty() || frames == 0 || channels == 0 {
            return;
        }
        let safe_channels = channels.clamp(1, 2);

        let mut waveform_left = [0.0f32; WAVEFORM_SIZE];
        let mut waveform_right = [0.0f32; WAVEFORM_SIZE];
        for (index, (left_out, right_out)) in waveform_left
            .iter_mut()
            .zip(waveform_right.iter_mut())
            .enumerate()
        {
            let source_frame = ((index * frames) / WAVEFORM_SIZE).min(frames - 1);
            let base = source_frame * safe_channels;
            let left = buffer[base];
            let right = if safe_channels > 1 { buffer[base + 1] } else { left };
            *left_out = left.clamp(-1.0, 1.0);
            *right_out = right.clamp(-1.0, 1.0);
        }

        let mut sum_sq_left = 0.0f64;
        let mut sum_sq_right = 0.0f64;
        for frame in 0..frames {
            let base = frame * safe_channels;
            let left = buffer[base];
            let right = if safe_channels > 1 { buffer[base + 1] } else { left };
            sum_sq_left += (left as f64) * (left as f64);
            sum_sq_right += (right as f64) * (right as f64);
        }
        let inv_frames = 1.0 / frames as f64;
        let vu = [
            ((sum_sq_left * inv_frames).sqrt()).clamp(0.0, 1.0) as f32,
            ((sum_sq_right * inv_frames).sqrt()).clamp(0.0, 1.0) as f32,
        ];

        let now_ns = monotonic_ns();
        let mut analysis_snapshot: Option<(Vec<f32>, usize)> = None;
        let analysis_rate = sample_rate.max(8000);
        {
            let mut state = self.state.lock().unwrap();
            for frame in 0..frames {
                let base = frame * safe_channels;
                let left = buffer[base];
                let right = if safe_channels > 1 { buffer[base + 1] } else { left };
                let mono = 0.5 * (left + right);
                let scope_index = state.scope_write_index;
                state.scope_left[scope_index] = left.clamp(-1.0, 1.0);
                state.scope_right[scope_index] = right.clamp(-1.0, 1.0);
                state.scope_write_index = (scope_index + 1) % SCOPE_HISTORY_SIZE;
                let mono_index = state.mono_write_index;
                state.mono_history[mono_index] = mono.clamp(-1.0, 1.0);
                state.mono_write_index = (mono_index + 1) % MONO_HISTORY_SIZE;
            }
            state.waveform_left = waveform_left;
            state.waveform_right = waveform_right;
            state.vu_levels_prev = state.vu_levels;
            state.vu_levels = vu;
            state.last_callback_frames = frames;
            state.last_callback_ns = now_ns;
            self.channel_count.store(safe_channels, Ordering::Relaxed);

            let analysis_hop = ((analysis_rate / 60) as usize).clamp(128, 4096);
            state.frames_since_analysis += frames;
            if state.frames_since_analysis >= analysis_hop {
                state.frames_since_analysis %= analysis_hop;
                analysis_snapshot = Some((state.mono_history.clone(), state.mono_write_index));
            }
        }

        // FFT outside the lock so readers are never blocked behind it.
        if let Some((mono_history, mono_write_index)) = analysis_snapshot {
            let bars = spectrum_bars(&mono_history, mono_write_index, analysis_rate, self.fft.as_ref());
            let mut state = self.state.lock().unwrap();
            state.bars_prev = std::mem::replace(&mut state.bars, bars);
        }
    }

    /// Downsampled waveform of the most recent callback.
    pub fn waveform(&self, channel_index: usize) -> Vec<f32> {
        self.mark_requested();
        let state = self.state.lock().unwrap();
        if channel_index == 1 {
            state.waveform_right.to_vec()
        } else {
            state.waveform_left.to_vec()
        }
    }

    /// Per-channel RMS, interpolated between the last two callbacks.
    pub fn vu_levels(&self) -> [f32; 2] {
        self.mark_requested();
        let state = self.state.lock().unwrap();
        let alpha = self.interpolation_alpha(&state);
        [
            (state.vu_levels_prev[0] + (state.vu_levels[0] - state.vu_levels_prev[0]) * alpha)
                .clamp(0.0, 1.0),
            (state.vu_levels_prev[1] + (state.vu_levels[1] - state.vu_levels_prev[1]) * alpha)
                .clamp(0.0, 1.0),
        ]
    }

    /// Spectrum bars, interpolated between the last two analyses.
    pub fn bars(&self) -> Vec<f32> {
        self.mark_requested();
        let state = self.state.lock().unwrap();
        let alpha = self.interpolation_alpha(&state);
        state
            .bars_prev
            .iter()
            .zip(state.bars.iter())
            .map(|(prev, curr)| (prev + (curr - prev) * alpha).clamp(0.0, 1.0))
            .collect()
    }

    /// A window of scope history resampled to 1024 points.
    pub fn waveform_scope(&self, channel_index: usize, window_ms: u32, sample_rate: u32) -> Vec<f32> {
        const OUTPUT_SIZE: usize = 1024;
        self.mark_requested();
        let state = self.state.lock().unwrap();
        let history = if channel_index == 1 {
            &state.scope_right
        } else {
            &state.scope_left
        };

        let rate = sample_rate.max(8000) as usize;
        let clamped_window_ms = window_ms.clamp(5, 200) as usize;
        let window_frames = ((rate * clamped_window_ms) / 1000).clamp(128, SCOPE_HISTORY_SIZE - 1);
        let start_index =
            (state.scope_write_index + SCOPE_HISTORY_SIZE - window_frames) % SCOPE_HISTORY_SIZE;

        let scale = (window_frames - 1) as f64 / (OUTPUT_SIZE - 1) as f64;
        (0..OUTPUT_SIZE)
            .map(|i| {
                let offset = i as f64 * scale;
                let floor = offset.floor() as usize;
                let frac = (offset - floor as f64) as f32;
                let index0 = (start_index + floor) % SCOPE_HISTORY_SIZE;
                let index1 = (index0 + 1) % SCOPE_HISTORY_SIZE;
                let sample = history[index0] + (history[index1] - history[index0]) * frac;
                sample.clamp(-1.0, 1.0)
            })
            .collect()
    }

    pub fn channel_count(&self) -> usize {
        self.mark_requested();
        self.channel_count.load(Ordering::Relaxed)
    }

    fn interpolation_alpha(&self, state: &VisualizationState) -> f32 {
        let callback_frames = state.last_callback_frames.max(1);
        let elapsed_ns = monotonic_ns().saturating_sub(state.last_callback_ns);
        // Assume 48 kHz when the rate is unknown; only affects smoothing.
        let callback_duration_ns = (callback_frames as f64 * 1.0e9) / 48_000.0;
        ((elapsed_ns as f64 / callback_duration_ns).clamp(0.0, 1.0)) as f32
    }
}

impl Default for VisualizationTap {
    fn default() -> Self {
        Self::new()
    }
}

fn tilt_compensation(freq_norm: f32) -> f32 {
    let shaped = freq_norm.clamp(0.0, 1.0).powf(0.85);
    // Attenuate low-end dominance while preserving high-band detail.
    0.24 + 1.76 * shaped
}

fn spectrum_bars(
    mono_history: &[f32],
    mono_write_index: usize,
    sample_rate: u32,
    fft: &dyn Fft<f32>,
) -> Vec<f32> {
    let history_size = mono_history.len();
    let mut window: Vec<Complex<f32>> = (0..FFT_SIZE)
        .map(|n| {
            let history_index =
                (mono_write_index + history_size - FFT_SIZE + n) % history_size;
            Complex::new(mono_history[history_index], 0.0)
        })
        .collect();

    // Remove DC and apply a Hann window before the FFT.
    let mean: f32 = window.iter().map(|c| c.re).sum::<f32>() / FFT_SIZE as f32;
    let inv_size_minus_one = 1.0 / (FFT_SIZE - 1) as f32;
    for (n, value) in window.iter_mut().enumerate() {
        let phase = n as f32 * inv_size_minus_one;
        let hann = 0.5 - 0.5 * (std::f32::consts::TAU * phase).cos();
        *value = Complex::new((value.re - mean) * hann, 0.0);
    }

    fft.process(&mut window);

    let fft_half = FFT_SIZE / 2;
    let rate = sample_rate.max(1) as f32;
    let raw_min_bin = (MIN_DISPLAY_HZ / rate) * FFT_SIZE as f32;
    let min_bin = (raw_min_bin.ceil() as usize).clamp(1, fft_half - 2);
    let max_bin = fft_half - 1;
    let min_frequency = (min_bin as f32 * rate) / FFT_SIZE as f32;
    let max_frequency = (max_bin as f32 * rate) / FFT_SIZE as f32;
    let frequency_ratio = (max_frequency / min_frequency.max(1.0)).max(1.001);

    let mut bars = vec![0.0f32; SPECTRUM_BINS];
    for (band, bar) in bars.iter_mut().enumerate() {
        let t0 = band as f32 / SPECTRUM_BINS as f32;
        let t1 = (band + 1) as f32 / SPECTRUM_BINS as f32;
        let start_frequency = min_frequency * frequency_ratio.powf(t0);
        let end_frequency = min_frequency * frequency_ratio.powf(t1);
        let start_bin = ((start_frequency / rate) * FFT_SIZE as f32).floor() as usize;
        let end_bin = (((end_frequency / rate) * FFT_SIZE as f32).ceil() as usize).saturating_sub(1);
        let clamped_start = start_bin.clamp(min_bin, max_bin);
        let clamped_end = end_bin.max(clamped_start).clamp(clamped_start, max_bin);

        let mut power_sum = 0.0f64;
        let mut count = 0usize;
        for bin in clamped_start..=clamped_end {
            let value = window[bin];
            power_sum += (value.re as f64) * (value.re as f64) + (value.im as f64) * (value.im as f64);
            count += 1;
        }
        if count == 0 {
            continue;
        }
        let magnitude = (power_sum / count as f64).sqrt() / FFT_SIZE as f64;
        let weighted = magnitude * (68.0 * tilt_compensation(t0)) as f64;
        // Soft knee prevents early saturation while preserving detail.
        *bar = (weighted / (1.0 + weighted)).clamp(0.0, 1.0) as f32;
    }
    bars
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_chunk(frequency: f32, rate: f32, frames: usize) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let s = (std::f32::consts::TAU * frequency * i as f32 / rate).sin() * 0.8;
                [s, s]
            })
            .collect()
    }

    #[test]
    fn updates_are_gated_on_demand() {
        let tap = VisualizationTap::new();
        assert!(!tap.should_update());
        let _ = tap.vu_levels();
        assert!(tap.should_update());
    }

    #[test]
    fn vu_tracks_signal_level() {
        let tap = VisualizationTap::new();
        let _ = tap.vu_levels(); // open the demand window
        let chunk = sine_chunk(440.0, 48_000.0, 2048);
        tap.update_from_callback(&chunk, 2048, 2, 48_000);
        tap.update_from_callback(&chunk, 2048, 2, 48_000);
        let vu = tap.vu_levels();
        // RMS of a 0.8 sine is ~0.57.
        assert!(vu[0] > 0.3, "expected audible VU, got {}", vu[0]);
        assert!(vu[0] <= 1.0);
    }

    #[test]
    fn spectrum_concentrates_energy_near_tone() {
        let tap = VisualizationTap::new();
        let _ = tap.bars();
        // Feed 4096 mono-history frames of a 1 kHz tone, then force analysis.
        for _ in 0..6 {
            let chunk = sine_chunk(1000.0, 48_000.0, 1024);
            tap.update_from_callback(&chunk, 1024, 2, 48_000);
        }
        let bars = tap.bars();
        let peak_band = bars
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        let peak_value = bars[peak_band];
        assert!(peak_value > 0.05, "expected spectral energy, got {peak_value}");
        // Energy in the far ends is much lower than the peak.
        assert!(bars[SPECTRUM_BINS - 1] < peak_value);
    }

    #[test]
    fn waveform_is_downsampled_copy() {
        let tap = VisualizationTap::new();
        let _ = tap.vu_levels();
        let chunk = sine_chunk(440.0, 48_000.0, 1024);
        tap.update_from_callback(&chunk, 1024, 2, 48_000);
        let waveform = tap.waveform(0);
        assert_eq!(waveform.len(), 256);
        assert!(waveform.iter().any(|s| s.abs() > 0.1));
    }

    #[test]
    fn scope_window_has_requested_size() {
        let tap = VisualizationTap::new();
        let _ = tap.vu_levels();
        let chunk = sine_chunk(440.0, 48_000.0, 4096);
        tap.update_from_callback(&chunk, 4096, 2, 48_000);
        let scope = tap.waveform_scope(0, 50, 48_000);
        assert_eq!(scope.len(), 1024);
        assert!(scope.iter().any(|s| s.abs() > 0.1));
    }

    #[test]
    fn mono_input_duplicates_channels() {
        let tap = VisualizationTap::new();
        let _ = tap.vu_levels();
        let chunk: Vec<f32> = (0..512).map(|i| (i as f32 * 0.01).sin()).collect();
        tap.update_from_callback(&chunk, 512, 1, 48_000);
        assert_eq!(tap.channel_count(), 1);
        let left = tap.waveform(0);
        let right = tap.waveform(1);
        assert_eq!(left, right);
    }
}
