//! Timeline reconciliation
//!
//! Decoders disagree about what "position" means: sample-accurate,
//! row-accurate, or free-running. Four variables reconcile decoder-reported
//! time with engine-observed time. For continuous timelines the position is
//! derived from absolute frames consumed since the last rebase; for
//! discontinuous timelines (trackers with pattern loops) the decoder's
//! reported position is never trusted for linear UI motion — it is smoothed
//! with bounded correction, and backward jumps at loop wraps or restarts snap
//! instead of easing back.

use crate::decoder::{RepeatMode, TimelineMode};

/// Correction factor toward the decoder-reported position per step.
const DECODER_CORRECTION_FACTOR: f64 = 0.12;
/// Per-step correction clamp, seconds.
const DECODER_CORRECTION_CLAMP: f64 = 0.25;
/// Correction factor toward the frame-derived position when the decoder
/// reports nothing.
const FRAME_CORRECTION_FACTOR: f64 = 0.10;
/// Backward jump size that snaps in LOOP_POINT mode.
const LOOP_POINT_SNAP_SECONDS: f64 = 0.5;
/// Backward jump size that snaps on repeat-track/subtune restarts...
const RESTART_SNAP_SECONDS: f64 = 1.0;
/// ...provided the decoder landed inside the first stretch of the track.
const RESTART_SNAP_WINDOW_SECONDS: f64 = 2.0;

/// Position bookkeeping for the active source. Lives under the decoder lock
/// and is only advanced by the render worker.
#[derive(Debug, Default)]
pub struct TimelineState {
    /// Frames of decoder output consumed since the last rebase.
    pub absolute_input_frames: i64,
    /// Timeline origin at the last rebase.
    pub base_seconds: f64,
    /// Monotonic render-time clock.
    pub output_clock_seconds: f64,
    /// Smoothed position surfaced for discontinuous-timeline decoders.
    smoothed_seconds: f64,
    smoother_initialized: bool,
}

/// What the render worker should publish after a reconcile step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionUpdate {
    /// Publish this absolute position.
    Set(f64),
    /// Advance the published position by this many seconds.
    Advance(f64),
    /// Leave the published position untouched.
    Keep,
}

/// Inputs for one reconcile step.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileInputs {
    /// Seconds of output produced this chunk (0 when the source ended).
    pub elapsed_seconds: f64,
    pub reached_end: bool,
    /// Decoder native rate; 0 when unknown.
    pub decoder_rate: u32,
    /// Decoder-reported position; negative when unknown.
    pub decoder_position: f64,
    pub timeline_mode: TimelineMode,
    pub repeat_mode: RepeatMode,
    /// Track duration; 0 or negative when unknown.
    pub duration: f64,
}

impl TimelineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the timeline origin to `position` (seek, restart, new source).
    pub fn rebase(&mut self, position: f64) {
        let origin = position.max(0.0);
        self.absolute_input_frames = 0;
        self.base_seconds = origin;
        self.output_clock_seconds = origin;
        self.smoothed_seconds = origin;
        self.smoother_initialized = false;
    }

    /// Keep the origin but force the smoother to re-latch (buffer-preserving
    /// resets, e.g. stream reconfiguration).
    pub fn mark_smoother_dirty(&mut self) {
        self.smoother_initialized = false;
    }

    /// Position derived from absolute frames consumed; negative when the
    /// derivation is unavailable.
    fn frame_derived_position(&self, decoder_rate: u32) -> f64 {
        if decoder_rate == 0 {
            return -1.0;
        }
        (self.base_seconds + self.absolute_input_frames as f64 / decoder_rate as f64).max(0.0)
    }

    /// Advance the render clock and reconcile one chunk.
    pub fn reconcile(&mut self, inputs: ReconcileInputs) -> PositionUpdate {
        if !inputs.reached_end && inputs.elapsed_seconds > 0.0 {
            self.output_clock_seconds += inputs.elapsed_seconds;
        }

        let frame_derived = self.frame_derived_position(inputs.decoder_rate);

        if inputs.timeline_mode == TimelineMode::Discontinuous {
            return PositionUpdate::Set(self.reconcile_discontinuous(inputs, frame_derived));
        }

        if frame_derived >= 0.0 && self.absolute_input_frames > 0 {
            PositionUpdate::Set(frame_derived)
        } else if inputs.decoder_position >= 0.0 {
            PositionUpdate::Set(inputs.decoder_position)
        } else if !inputs.reached_end && inputs.elapsed_seconds > 0.0 {
            PositionUpdate::Advance(inputs.elapsed_seconds)
        } else {
            PositionUpdate::Keep
        }
    }

    fn reconcile_discontinuous(&mut self, inputs: ReconcileInputs, frame_derived: f64) -> f64 {
        if !self.smoother_initialized {
            self.smoothed_seconds = if frame_derived >= 0.0 && self.absolute_input_frames > 0 {
                frame_derived
            } else {
                self.output_clock_seconds
            };
            self.smoother_initialized = true;
        }

        let mut next = self.smoothed_seconds;
        if !inputs.reached_end && inputs.elapsed_seconds > 0.0 {
            next += inputs.elapsed_seconds;
        }

        if inputs.decoder_position >= 0.0 {
            let loop_point_mode = inputs.repeat_mode == RepeatMode::LoopPoint;
            let backward_jump = next - inputs.decoder_position;
            let restart_like_jump = !loop_point_mode
                && matches!(inputs.repeat_mode, RepeatMode::TrackSet | RepeatMode::Current)
                && backward_jump > RESTART_SNAP_SECONDS
                && inputs.decoder_position < RESTART_SNAP_WINDOW_SECONDS;

            if loop_point_mode && backward_jump > LOOP_POINT_SNAP_SECONDS {
                // Backward jumps at the wrap are expected; snap to avoid a
                // visible step-back in the seek bar.
                next = inputs.decoder_position;
                self.output_clock_seconds = inputs.decoder_position;
            } else if restart_like_jump {
                // Repeat-track/subtune restarts snap instead of easing back
                // from the previous end position.
                next = inputs.decoder_position;
                self.output_clock_seconds = inputs.decoder_position;
            } else {
                let correction = inputs.decoder_position - next;
                next += (correction * DECODER_CORRECTION_FACTOR)
                    .clamp(-DECODER_CORRECTION_CLAMP, DECODER_CORRECTION_CLAMP);
            }
        } else if frame_derived >= 0.0 {
            let correction = frame_derived - next;
            next += correction * FRAME_CORRECTION_FACTOR;
        }

        if inputs.duration > 0.0 && inputs.repeat_mode != RepeatMode::LoopPoint {
            next = next.clamp(0.0, inputs.duration);
        } else if next < 0.0 {
            next = 0.0;
        }

        self.smoothed_seconds = next;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> ReconcileInputs {
        ReconcileInputs {
            elapsed_seconds: 0.02,
            reached_end: false,
            decoder_rate: 48_000,
            decoder_position: -1.0,
            timeline_mode: TimelineMode::ContinuousLinear,
            repeat_mode: RepeatMode::Off,
            duration: 180.0,
        }
    }

    #[test]
    fn continuous_uses_frame_derived_position() {
        let mut timeline = TimelineState::new();
        timeline.rebase(10.0);
        timeline.absolute_input_frames = 48_000; // one second consumed
        let update = timeline.reconcile(inputs());
        assert_eq!(update, PositionUpdate::Set(11.0));
    }

    #[test]
    fn continuous_falls_back_to_decoder_position() {
        let mut timeline = TimelineState::new();
        timeline.rebase(0.0);
        let mut i = inputs();
        i.decoder_position = 42.0;
        assert_eq!(timeline.reconcile(i), PositionUpdate::Set(42.0));
    }

    #[test]
    fn continuous_integrates_when_nothing_known() {
        let mut timeline = TimelineState::new();
        timeline.rebase(0.0);
        let mut i = inputs();
        i.decoder_rate = 0;
        assert_eq!(timeline.reconcile(i), PositionUpdate::Advance(0.02));
    }

    #[test]
    fn discontinuous_applies_bounded_correction() {
        let mut timeline = TimelineState::new();
        timeline.rebase(0.0);
        let mut i = inputs();
        i.timeline_mode = TimelineMode::Discontinuous;
        i.decoder_position = 5.0; // far ahead of the smoothed clock
        let PositionUpdate::Set(position) = timeline.reconcile(i) else {
            panic!("expected Set");
        };
        // One step may only move 0.25 s toward the report, plus elapsed
        // (counted once into the clock and once into the smoother step).
        assert!(position <= 2.0 * 0.02 + DECODER_CORRECTION_CLAMP + 1e-9);
        assert!(position > 0.02);
    }

    #[test]
    fn loop_point_wrap_snaps_to_zero() {
        let mut timeline = TimelineState::new();
        timeline.rebase(0.0);
        let mut i = inputs();
        i.timeline_mode = TimelineMode::Discontinuous;
        i.repeat_mode = RepeatMode::LoopPoint;
        i.decoder_position = 2.999;
        // Walk the smoother close to the end of a 3 s loop.
        for _ in 0..200 {
            timeline.reconcile(i);
        }
        // The decoder wraps to the loop start.
        i.decoder_position = 0.01;
        let PositionUpdate::Set(position) = timeline.reconcile(i) else {
            panic!("expected Set");
        };
        assert!(
            position < 0.1,
            "expected snap to loop start, got {position}"
        );
        assert!((timeline.output_clock_seconds - 0.01).abs() < 1e-9);
    }

    #[test]
    fn repeat_restart_snaps_inside_window() {
        let mut timeline = TimelineState::new();
        timeline.rebase(0.0);
        let mut i = inputs();
        i.timeline_mode = TimelineMode::Discontinuous;
        i.repeat_mode = RepeatMode::Current;
        i.decoder_position = 30.0;
        for _ in 0..400 {
            timeline.reconcile(i);
        }
        i.decoder_position = 0.5; // restarted near zero
        let PositionUpdate::Set(position) = timeline.reconcile(i) else {
            panic!("expected Set");
        };
        assert!((position - 0.5).abs() < 1e-9);
    }

    #[test]
    fn no_snap_outside_restart_window() {
        let mut timeline = TimelineState::new();
        timeline.rebase(20.0);
        let mut i = inputs();
        i.timeline_mode = TimelineMode::Discontinuous;
        i.repeat_mode = RepeatMode::Current;
        // Backward jump of ~10 s but the decoder is NOT near the start, so the
        // smoother eases instead of snapping.
        i.decoder_position = 10.0;
        let PositionUpdate::Set(position) = timeline.reconcile(i) else {
            panic!("expected Set");
        };
        assert!(position > 19.0);
    }

    #[test]
    fn discontinuous_clamps_to_duration_outside_loop_point() {
        let mut timeline = TimelineState::new();
        timeline.rebase(179.99);
        let mut i = inputs();
        i.timeline_mode = TimelineMode::Discontinuous;
        i.decoder_position = 500.0;
        let PositionUpdate::Set(position) = timeline.reconcile(i) else {
            panic!("expected Set");
        };
        assert!(position <= 180.0);
    }

    #[test]
    fn rebase_resets_derivation() {
        let mut timeline = TimelineState::new();
        timeline.absolute_input_frames = 96_000;
        timeline.rebase(7.0);
        assert_eq!(timeline.absolute_input_frames, 0);
        assert_eq!(timeline.base_seconds, 7.0);
        assert_eq!(timeline.output_clock_seconds, 7.0);
    }
}
