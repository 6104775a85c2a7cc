//! Dual-strategy sample rate conversion
//!
//! Per render chunk the engine either bypasses (decoder rate == stream rate),
//! runs the built-in linear interpolator, or runs the high-quality polyphase
//! path (rubato). The high-quality path is never used for decoders with a
//! discontinuous timeline: its internal buffering would mask position jumps
//! at pattern-loop wraps. Both paths report the same end-of-content signal
//! and always fill the full output chunk (zero-padded past the end).

use crate::config::ResamplerPreference;
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::{debug, error};

/// Frames decoded per inner read in both resampler paths.
pub const DECODE_CHUNK_FRAMES: usize = 1024;

/// Linear-path input buffer compaction threshold, in consumed frames.
const INPUT_COMPACTION_FRAMES: usize = 4096;

/// Result of one repeat-aware decoder read.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOutcome {
    /// Frames produced (interleaved at the reader's channel count).
    pub frames: usize,
    /// True end of content (repeat handling already exhausted).
    pub reached_end: bool,
    /// The reader restarted the source (repeat wrap / subtune advance) and
    /// any buffered pre-restart input must be discarded.
    pub pipeline_reset: bool,
}

/// Source of decoder audio as seen by the resampler paths.
///
/// `read_chunk` carries the repeat-mode semantics; `note_input_consumed`
/// advances the absolute-input-frames counter used for timeline derivation.
/// The bypass path intentionally never calls `note_input_consumed`.
pub trait ChunkReader {
    fn read_chunk(&mut self, buffer: &mut [f32], frames: usize) -> ReadOutcome;
    fn note_input_consumed(&mut self, _frames: usize) {}
}

struct HqResampler {
    resampler: FastFixedIn<f32>,
    channels: usize,
    input_rate: u32,
    output_rate: u32,
    /// Interleaved input waiting for a full processing chunk.
    pending: Vec<f32>,
    /// Interleaved resampled output not yet handed to the caller.
    backlog: Vec<f32>,
    backlog_offset: usize,
}

impl HqResampler {
    fn pending_frames(&self) -> usize {
        self.pending.len() / self.channels
    }

    fn backlog_frames(&self) -> usize {
        (self.backlog.len() - self.backlog_offset) / self.channels
    }

    fn push_output(&mut self, planar: Vec<Vec<f32>>) {
        self.backlog.extend(interleave(&planar));
        if self.backlog_offset > INPUT_COMPACTION_FRAMES * self.channels {
            self.backlog.drain(..self.backlog_offset);
            self.backlog_offset = 0;
        }
    }

    fn take_backlog(&mut self, out: &mut [f32], frames: usize) -> usize {
        let to_copy = frames.min(self.backlog_frames());
        let samples = to_copy * self.channels;
        if samples > 0 {
            out[..samples]
                .copy_from_slice(&self.backlog[self.backlog_offset..self.backlog_offset + samples]);
            self.backlog_offset += samples;
            if self.backlog_offset >= self.backlog.len() {
                self.backlog.clear();
                self.backlog_offset = 0;
            }
        }
        to_copy
    }

    fn clear_buffers(&mut self) {
        self.pending.clear();
        self.backlog.clear();
        self.backlog_offset = 0;
        self.resampler.reset();
    }
}

/// Per-source resampler state. Lives under the decoder lock.
#[derive(Default)]
pub struct ResamplerState {
    // Built-in linear path: interleaved input window + fractional read head.
    input_buffer: Vec<f32>,
    input_start_frame: usize,
    input_position: f64,
    decode_scratch: Vec<f32>,

    hq: Option<HqResampler>,
    /// One-shot latch: the high-quality engine failed, stop retrying for this source.
    hq_unavailable: bool,

    path_logged_for_track: bool,
    bypass_logged_for_track: bool,
}

impl ResamplerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all buffered input/output and filter state. Timeline bookkeeping
    /// is owned by the caller and reset separately.
    pub fn reset(&mut self) {
        self.clear_linear_buffers();
        if let Some(hq) = self.hq.as_mut() {
            hq.clear_buffers();
        }
        self.path_logged_for_track = false;
        self.bypass_logged_for_track = false;
    }

    /// Forget the unavailable latch (new pipeline config may retry).
    pub fn clear_unavailable_latch(&mut self) {
        self.hq_unavailable = false;
    }

    fn clear_linear_buffers(&mut self) {
        self.input_buffer.clear();
        self.input_start_frame = 0;
        self.input_position = 0.0;
    }

    fn ensure_scratch(&mut self, channels: usize) {
        let needed = DECODE_CHUNK_FRAMES * channels;
        if self.decode_scratch.len() < needed {
            self.decode_scratch.resize(needed, 0.0);
        }
    }

    fn ensure_hq(&mut self, channels: usize, input_rate: u32, output_rate: u32) -> bool {
        if let Some(hq) = self.hq.as_ref() {
            if hq.channels == channels && hq.input_rate == input_rate && hq.output_rate == output_rate
            {
                return true;
            }
        }
        match FastFixedIn::<f32>::new(
            output_rate as f64 / input_rate as f64,
            1.0,
            PolynomialDegree::Septic,
            DECODE_CHUNK_FRAMES,
            channels,
        ) {
            Ok(resampler) => {
                self.hq = Some(HqResampler {
                    resampler,
                    channels,
                    input_rate,
                    output_rate,
                    pending: Vec::new(),
                    backlog: Vec::new(),
                    backlog_offset: 0,
                });
                debug!(channels, input_rate, output_rate, "high-quality resampler ready");
                true
            }
            Err(e) => {
                error!(
                    channels,
                    input_rate,
                    output_rate,
                    error = %e,
                    "high-quality resampler unavailable, falling back to built-in"
                );
                self.hq = None;
                false
            }
        }
    }

    /// Fill `out` with exactly `frames` frames at the stream rate, pulling
    /// decoder input through `reader`. Unfillable tail is zeroed.
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &mut self,
        reader: &mut dyn ChunkReader,
        out: &mut [f32],
        frames: usize,
        channels: usize,
        stream_rate: u32,
        decoder_rate: u32,
        preference: ResamplerPreference,
        discontinuous_timeline: bool,
        decoder_name: &str,
        reached_end: &mut bool,
    ) {
        if frames == 0 || channels == 0 {
            return;
        }
        let render_rate = if decoder_rate > 0 { decoder_rate } else { stream_rate };

        if stream_rate == 0 || render_rate == stream_rate {
            if !self.bypass_logged_for_track {
                debug!(
                    decoder_rate = render_rate,
                    stream_rate,
                    decoder = decoder_name,
                    preference = preference.label(),
                    "resampler bypassed"
                );
                self.bypass_logged_for_track = true;
            }
            let outcome = reader.read_chunk(out, frames);
            if outcome.reached_end {
                *reached_end = true;
            }
            if outcome.frames < frames {
                out[outcome.frames * channels..frames * channels].fill(0.0);
            }
            return;
        }

        // Discontinuous timelines cannot tolerate resampler-internal
        // buffering: position jumps at wrap would be masked.
        let allow_hq = !discontinuous_timeline;
        if preference == ResamplerPreference::HighQuality && !self.hq_unavailable && allow_hq {
            if self.ensure_hq(channels, render_rate, stream_rate) {
                if !self.path_logged_for_track {
                    debug!(
                        decoder_rate = render_rate,
                        stream_rate,
                        decoder = decoder_name,
                        "resampler path selected: high-quality"
                    );
                    self.path_logged_for_track = true;
                }
                self.render_high_quality(reader, out, frames, channels, reached_end);
                return;
            }
            self.hq_unavailable = true;
        }

        if !self.path_logged_for_track {
            debug!(
                decoder_rate = render_rate,
                stream_rate,
                decoder = decoder_name,
                preference = preference.label(),
                hq_unavailable = self.hq_unavailable,
                hq_timeline_guard = preference == ResamplerPreference::HighQuality && !allow_hq,
                "resampler path selected: built-in linear"
            );
            self.path_logged_for_track = true;
        }
        self.render_linear(reader, out, frames, channels, stream_rate, render_rate, reached_end);
    }

    fn render_linear(
        &mut self,
        reader: &mut dyn ChunkReader,
        out: &mut [f32],
        frames: usize,
        channels: usize,
        stream_rate: u32,
        render_rate: u32,
        reached_end: &mut bool,
    ) {
        let input_per_output = render_rate as f64 / stream_rate as f64;
        self.ensure_scratch(channels);

        let mut out_frame = 0usize;
        while out_frame < frames {
            let mut available = self.available_input_frames(channels);
            let mut base_frame = self.input_position.floor() as usize;

            // Decode until interpolation has base+1 covered (or input is dry).
            while base_frame + 1 >= available {
                let outcome = reader
                    .read_chunk(&mut self.decode_scratch[..DECODE_CHUNK_FRAMES * channels], DECODE_CHUNK_FRAMES);
                if outcome.pipeline_reset {
                    // Post-restart data must land in a clean window.
                    self.clear_linear_buffers();
                }
                if outcome.reached_end {
                    *reached_end = true;
                }
                if outcome.frames == 0 {
                    break;
                }
                reader.note_input_consumed(outcome.frames);
                self.input_buffer
                    .extend_from_slice(&self.decode_scratch[..outcome.frames * channels]);
                available = self.available_input_frames(channels);
                base_frame = self.input_position.floor() as usize;
            }

            available = self.available_input_frames(channels);
            base_frame = self.input_position.floor() as usize;
            if base_frame >= available {
                break;
            }

            let next_frame = (base_frame + 1).min(available - 1);
            let frac = (self.input_position - base_frame as f64).clamp(0.0, 1.0) as f32;
            let absolute_base = self.input_start_frame + base_frame;
            let absolute_next = self.input_start_frame + next_frame;
            for channel in 0..channels {
                let a = self.input_buffer[absolute_base * channels + channel];
                let b = self.input_buffer[absolute_next * channels + channel];
                out[out_frame * channels + channel] = a + (b - a) * frac;
            }

            out_frame += 1;
            self.input_position += input_per_output;
        }

        if out_frame < frames {
            out[out_frame * channels..frames * channels].fill(0.0);
        }

        let available = self.available_input_frames(channels);
        let mut trim_frames = (self.input_position.floor() as usize).saturating_sub(1);
        trim_frames = trim_frames.min(available);
        if trim_frames > 0 {
            self.input_start_frame += trim_frames;
            self.input_position -= trim_frames as f64;
        }

        // Compact infrequently to avoid per-chunk front drains.
        if self.input_start_frame > INPUT_COMPACTION_FRAMES {
            self.input_buffer.drain(..self.input_start_frame * channels);
            self.input_start_frame = 0;
        }
    }

    fn available_input_frames(&self, channels: usize) -> usize {
        (self.input_buffer.len() / channels).saturating_sub(self.input_start_frame)
    }

    fn render_high_quality(
        &mut self,
        reader: &mut dyn ChunkReader,
        out: &mut [f32],
        frames: usize,
        channels: usize,
        reached_end: &mut bool,
    ) {
        self.ensure_scratch(channels);
        let mut out_frame = 0usize;
        let mut draining = false;

        while out_frame < frames {
            {
                let hq = self.hq.as_mut().expect("high-quality resampler present");
                let copied = hq.take_backlog(&mut out[out_frame * channels..], frames - out_frame);
                out_frame += copied;
            }
            if out_frame >= frames {
                break;
            }

            if !draining {
                let outcome = reader
                    .read_chunk(&mut self.decode_scratch[..DECODE_CHUNK_FRAMES * channels], DECODE_CHUNK_FRAMES);
                if outcome.pipeline_reset {
                    if let Some(hq) = self.hq.as_mut() {
                        hq.clear_buffers();
                    }
                }
                if outcome.reached_end {
                    *reached_end = true;
                    draining = true;
                }
                if outcome.frames > 0 {
                    reader.note_input_consumed(outcome.frames);
                    let hq = self.hq.as_mut().expect("high-quality resampler present");
                    hq.pending
                        .extend_from_slice(&self.decode_scratch[..outcome.frames * channels]);
                    while hq.pending_frames() >= DECODE_CHUNK_FRAMES {
                        let planar =
                            deinterleave(&hq.pending[..DECODE_CHUNK_FRAMES * channels], channels);
                        match hq.resampler.process(&planar, None) {
                            Ok(output) => hq.push_output(output),
                            Err(e) => {
                                error!(error = %e, "high-quality conversion failed");
                                self.hq_unavailable = true;
                                break;
                            }
                        }
                        hq.pending.drain(..DECODE_CHUNK_FRAMES * channels);
                    }
                    if self.hq_unavailable {
                        break;
                    }
                } else if !outcome.reached_end {
                    // Stalled without end: leave the remainder silent rather
                    // than spinning on the decoder.
                    break;
                }
            } else {
                let hq = self.hq.as_mut().expect("high-quality resampler present");
                if hq.pending_frames() > 0 {
                    let planar = deinterleave(&hq.pending, channels);
                    match hq.resampler.process_partial(Some(planar.as_slice()), None) {
                        Ok(output) => hq.push_output(output),
                        Err(e) => {
                            error!(error = %e, "high-quality drain conversion failed");
                        }
                    }
                    hq.pending.clear();
                } else {
                    match hq.resampler.process_partial(None::<&[Vec<f32>]>, None) {
                        Ok(output) if !output.is_empty() && !output[0].is_empty() => {
                            hq.push_output(output)
                        }
                        _ => break, // drain complete
                    }
                }
            }
        }

        if out_frame < frames {
            out[out_frame * channels..frames * channels].fill(0.0);
        }
    }
}

/// Convert interleaved samples to planar channel vectors.
pub fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frame_count = samples.len() / channels;
    let mut planar = vec![Vec::with_capacity(frame_count); channels];
    for frame in 0..frame_count {
        for channel in 0..channels {
            planar[channel].push(samples[frame * channels + channel]);
        }
    }
    planar
}

/// Convert planar channel vectors to interleaved samples.
pub fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    if planar.is_empty() {
        return Vec::new();
    }
    let channels = planar.len();
    let frame_count = planar[0].len();
    let mut interleaved = Vec::with_capacity(frame_count * channels);
    for frame in 0..frame_count {
        for channel_data in planar.iter().take(channels) {
            interleaved.push(channel_data[frame]);
        }
    }
    interleaved
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reader producing a linear ramp so interpolation is easy to check.
    struct RampReader {
        value: f32,
        step: f32,
        remaining: usize,
        channels: usize,
        resets: Vec<usize>,
        consumed: usize,
    }

    impl RampReader {
        fn new(step: f32, remaining: usize, channels: usize) -> Self {
            Self {
                value: 0.0,
                step,
                remaining,
                channels,
                resets: Vec::new(),
                consumed: 0,
            }
        }
    }

    impl ChunkReader for RampReader {
        fn read_chunk(&mut self, buffer: &mut [f32], frames: usize) -> ReadOutcome {
            let to_render = frames.min(self.remaining);
            for frame in 0..to_render {
                for channel in 0..self.channels {
                    buffer[frame * self.channels + channel] = self.value;
                }
                self.value += self.step;
            }
            self.remaining -= to_render;
            ReadOutcome {
                frames: to_render,
                reached_end: to_render == 0,
                pipeline_reset: false,
            }
        }

        fn note_input_consumed(&mut self, frames: usize) {
            self.consumed += frames;
        }
    }

    #[test]
    fn bypass_copies_and_pads() {
        let mut state = ResamplerState::new();
        let mut reader = RampReader::new(0.0, 100, 2);
        let mut out = vec![1.0f32; 256 * 2];
        let mut reached_end = false;
        state.render(
            &mut reader,
            &mut out,
            256,
            2,
            48_000,
            48_000,
            ResamplerPreference::BuiltIn,
            false,
            "test",
            &mut reached_end,
        );
        // 100 frames of signal, the rest zero-padded.
        assert!(out[200 * 2..].iter().all(|s| *s == 0.0));
        // Bypass path never counts absolute input frames.
        assert_eq!(reader.consumed, 0);
    }

    #[test]
    fn linear_downsample_produces_full_chunk() {
        let mut state = ResamplerState::new();
        let mut reader = RampReader::new(1.0, 100_000, 2);
        let mut out = vec![0.0f32; 512 * 2];
        let mut reached_end = false;
        state.render(
            &mut reader,
            &mut out,
            512,
            2,
            48_000,
            96_000, // decoder twice as fast: every output frame skips one input frame
            ResamplerPreference::BuiltIn,
            false,
            "test",
            &mut reached_end,
        );
        assert!(!reached_end);
        // Ramp advances by the rate ratio per output frame.
        assert!((out[0] - 0.0).abs() < 1e-4);
        assert!((out[2] - 2.0).abs() < 1e-4);
        assert!((out[10 * 2] - 20.0).abs() < 1e-4);
        // Absolute-input accounting covers everything decoded.
        assert!(reader.consumed >= 1024);
    }

    #[test]
    fn linear_upsample_interpolates_between_frames() {
        let mut state = ResamplerState::new();
        let mut reader = RampReader::new(1.0, 100_000, 1);
        let mut out = vec![0.0f32; 8];
        let mut reached_end = false;
        state.render(
            &mut reader,
            &mut out,
            8,
            1,
            48_000,
            24_000, // half-rate decoder: output advances 0.5 input frames per frame
            ResamplerPreference::BuiltIn,
            false,
            "test",
            &mut reached_end,
        );
        assert!((out[0] - 0.0).abs() < 1e-4);
        assert!((out[1] - 0.5).abs() < 1e-4);
        assert!((out[2] - 1.0).abs() < 1e-4);
        assert!((out[3] - 1.5).abs() < 1e-4);
    }

    #[test]
    fn linear_end_of_content_zero_pads_and_flags() {
        let mut state = ResamplerState::new();
        let mut reader = RampReader::new(0.5, 64, 2);
        let mut out = vec![0.5f32; 256 * 2];
        let mut reached_end = false;
        state.render(
            &mut reader,
            &mut out,
            256,
            2,
            48_000,
            44_100,
            ResamplerPreference::BuiltIn,
            false,
            "test",
            &mut reached_end,
        );
        assert!(reached_end);
        assert!(out[128 * 2..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn high_quality_converts_and_keeps_frame_budget() {
        let mut state = ResamplerState::new();
        let mut reader = RampReader::new(0.001, 100_000, 2);
        let mut out = vec![0.0f32; 480 * 2];
        let mut reached_end = false;
        state.render(
            &mut reader,
            &mut out,
            480,
            2,
            48_000,
            44_100,
            ResamplerPreference::HighQuality,
            false,
            "test",
            &mut reached_end,
        );
        assert!(!reached_end);
        // The chunk is fully populated with converted (finite) audio.
        assert!(out.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn high_quality_guard_forces_linear_for_discontinuous_timelines() {
        let mut state = ResamplerState::new();
        let mut reader = RampReader::new(1.0, 100_000, 2);
        let mut out = vec![0.0f32; 64 * 2];
        let mut reached_end = false;
        state.render(
            &mut reader,
            &mut out,
            64,
            2,
            48_000,
            96_000,
            ResamplerPreference::HighQuality,
            true, // discontinuous timeline
            "test",
            &mut reached_end,
        );
        // Linear behavior: exact 2:1 decimation of the ramp.
        assert!((out[2] - 2.0).abs() < 1e-4);
        // No high-quality context was instantiated.
        assert!(state.hq.is_none());
    }

    #[test]
    fn high_quality_drains_to_silence_at_end() {
        let mut state = ResamplerState::new();
        let mut reader = RampReader::new(0.01, 2000, 2);
        let mut reached_end = false;
        let mut out = vec![0.0f32; 4096 * 2];
        state.render(
            &mut reader,
            &mut out,
            4096,
            2,
            48_000,
            44_100,
            ResamplerPreference::HighQuality,
            false,
            "test",
            &mut reached_end,
        );
        assert!(reached_end);
        // Well past the converted content everything is silent.
        assert!(out[3500 * 2..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn deinterleave_interleave_round_trip() {
        let interleaved = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let planar = deinterleave(&interleaved, 2);
        assert_eq!(planar[0], vec![1.0, 3.0, 5.0]);
        assert_eq!(planar[1], vec![2.0, 4.0, 6.0]);
        assert_eq!(interleave(&planar), interleaved);
    }

    #[test]
    fn reset_clears_input_window() {
        let mut state = ResamplerState::new();
        let mut reader = RampReader::new(1.0, 100_000, 2);
        let mut out = vec![0.0f32; 64 * 2];
        let mut reached_end = false;
        state.render(
            &mut reader,
            &mut out,
            64,
            2,
            48_000,
            96_000,
            ResamplerPreference::BuiltIn,
            false,
            "test",
            &mut reached_end,
        );
        assert!(!state.input_buffer.is_empty());
        state.reset();
        assert!(state.input_buffer.is_empty());
        assert_eq!(state.input_start_frame, 0);
        assert_eq!(state.input_position, 0.0);
    }
}
