//! Render ring
//!
//! Single-producer/single-consumer buffer of ready-to-output interleaved
//! stereo f32 samples, guarded by a mutex held only for copies (never across
//! a decode or DSP call). Backed by a contiguous vector plus a read offset;
//! the consumed prefix is shifted out only once the offset passes a
//! watermark, so a pop never reallocates.

use tracing::trace;

/// Read offset watermark (in samples) past which the ring compacts.
const COMPACTION_WATERMARK_SAMPLES: usize = 8192;

/// Coarse ring activity summary derived from the flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingState {
    Empty,
    Filling,
    Steady,
    Draining,
    TerminalStopPending,
}

/// Interleaved-stereo sample ring.
///
/// Content is always stereo at the stream sample rate regardless of the
/// decoder's native format; mono input is duplicated on insert.
#[derive(Debug, Default)]
pub struct RenderRing {
    samples: Vec<f32>,
    offset: usize,
}

impl RenderRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.offset = 0;
    }

    /// Append `frames` frames of interleaved audio with `channels` channels.
    /// Mono input is duplicated to stereo; channels beyond the second are
    /// ignored (the pipeline caps decoders at stereo upstream).
    pub fn append(&mut self, data: &[f32], frames: usize, channels: usize) {
        if frames == 0 || channels == 0 {
            return;
        }
        if channels == 2 {
            self.samples.extend_from_slice(&data[..frames * 2]);
            return;
        }
        self.samples.reserve(frames * 2);
        for frame in 0..frames {
            let mono = data[frame * channels];
            self.samples.push(mono);
            self.samples.push(mono);
        }
    }

    /// Pop up to `frames` stereo frames into `out`. Returns frames copied.
    pub fn pop(&mut self, out: &mut [f32], frames: usize) -> usize {
        let available_samples = self.samples.len().saturating_sub(self.offset);
        let available_frames = available_samples / 2;
        let frames_to_copy = frames.min(available_frames);
        let samples_to_copy = frames_to_copy * 2;
        if samples_to_copy > 0 {
            out[..samples_to_copy]
                .copy_from_slice(&self.samples[self.offset..self.offset + samples_to_copy]);
            self.offset += samples_to_copy;
            if self.offset >= self.samples.len() {
                self.samples.clear();
                self.offset = 0;
            } else if self.offset > COMPACTION_WATERMARK_SAMPLES {
                trace!(offset = self.offset, "compacting render ring");
                self.samples.drain(..self.offset);
                self.offset = 0;
            }
        }
        frames_to_copy
    }

    pub fn frames_available(&self) -> usize {
        self.samples.len().saturating_sub(self.offset) / 2
    }

    /// Derive the coarse activity state from the surrounding flags.
    pub fn state(
        &self,
        is_playing: bool,
        target_frames: usize,
        terminal_stop_pending: bool,
    ) -> RingState {
        let buffered = self.frames_available();
        if terminal_stop_pending {
            return RingState::TerminalStopPending;
        }
        if buffered == 0 {
            return RingState::Empty;
        }
        if !is_playing {
            return RingState::Draining;
        }
        if buffered < target_frames {
            RingState::Filling
        } else {
            RingState::Steady
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_pop_round_trip() {
        let mut ring = RenderRing::new();
        let chunk = [0.1f32, 0.2, 0.3, 0.4, 0.5, 0.6];
        ring.append(&chunk, 3, 2);
        assert_eq!(ring.frames_available(), 3);

        let mut out = [0.0f32; 4];
        assert_eq!(ring.pop(&mut out, 2), 2);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.4]);
        assert_eq!(ring.frames_available(), 1);
    }

    #[test]
    fn mono_input_duplicates_to_stereo() {
        let mut ring = RenderRing::new();
        ring.append(&[0.25, -0.5], 2, 1);
        let mut out = [0.0f32; 4];
        assert_eq!(ring.pop(&mut out, 2), 2);
        assert_eq!(out, [0.25, 0.25, -0.5, -0.5]);
    }

    #[test]
    fn short_pop_reports_copied_frames() {
        let mut ring = RenderRing::new();
        ring.append(&[1.0, 1.0], 1, 2);
        let mut out = [0.0f32; 8];
        assert_eq!(ring.pop(&mut out, 4), 1);
        assert_eq!(ring.frames_available(), 0);
    }

    #[test]
    fn full_drain_resets_storage() {
        let mut ring = RenderRing::new();
        ring.append(&vec![0.5; 256], 128, 2);
        let mut out = vec![0.0f32; 256];
        assert_eq!(ring.pop(&mut out, 128), 128);
        assert_eq!(ring.frames_available(), 0);
        // Offset reset: appending again starts from a clean prefix.
        ring.append(&[0.7, 0.7], 1, 2);
        let mut two = [0.0f32; 2];
        assert_eq!(ring.pop(&mut two, 1), 1);
        assert_eq!(two, [0.7, 0.7]);
    }

    #[test]
    fn compaction_past_watermark_preserves_content() {
        let mut ring = RenderRing::new();
        // Two regions: a large consumed prefix and a tail we expect to keep.
        ring.append(&vec![0.0; COMPACTION_WATERMARK_SAMPLES + 2], (COMPACTION_WATERMARK_SAMPLES + 2) / 2, 2);
        ring.append(&[0.9, 0.8, 0.7, 0.6], 2, 2);

        let mut discard = vec![0.0f32; COMPACTION_WATERMARK_SAMPLES + 2];
        let consumed = ring.pop(&mut discard, (COMPACTION_WATERMARK_SAMPLES + 2) / 2);
        assert_eq!(consumed, (COMPACTION_WATERMARK_SAMPLES + 2) / 2);

        let mut out = [0.0f32; 4];
        assert_eq!(ring.pop(&mut out, 2), 2);
        assert_eq!(out, [0.9, 0.8, 0.7, 0.6]);
    }

    #[test]
    fn frames_available_is_monotonic_between_operations() {
        let mut ring = RenderRing::new();
        ring.append(&vec![0.1; 64], 32, 2);
        let before = ring.frames_available();
        let mut out = vec![0.0f32; 20];
        ring.pop(&mut out, 10);
        assert_eq!(ring.frames_available(), before - 10);
    }

    #[test]
    fn state_derivation() {
        let mut ring = RenderRing::new();
        assert_eq!(ring.state(true, 1024, false), RingState::Empty);
        ring.append(&vec![0.0; 64], 32, 2);
        assert_eq!(ring.state(true, 1024, false), RingState::Filling);
        assert_eq!(ring.state(true, 16, false), RingState::Steady);
        assert_eq!(ring.state(false, 16, false), RingState::Draining);
        assert_eq!(ring.state(false, 16, true), RingState::TerminalStopPending);
    }
}
