//! Render worker
//!
//! One dedicated thread fills the render ring: decode through the resampler
//! path, reconcile the timeline, run the DSP chain, append. It cooperates
//! with the facade over the ring condvar with an 8 ms tick, holds the decoder
//! lock for exactly one chunk at a time, and never holds it across the ring
//! append.

use crate::audio::resampler::{ChunkReader, ReadOutcome};
use crate::decoder::{Decoder, RepeatMode, TimelineMode};
use crate::playback::effects::{apply_channel_routing, apply_gain, apply_mono_downmix};
use crate::playback::engine::core::EngineShared;
use crate::playback::fader::end_fade_gain;
use crate::playback::timeline::{PositionUpdate, ReconcileInputs, TimelineState};
use crate::util::{monotonic_ns, promote_thread_for_audio};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Cooperative tick so tuning/boost changes are observed without a wakeup.
const WORKER_TICK: Duration = Duration::from_millis(8);
/// Zero-read retries at a loop-point wrap before giving up the chunk.
const LOOP_POINT_WRAP_RETRIES: usize = 32;
/// Short-read top-up rounds (and per-round retries) in loop-point mode.
const LOOP_POINT_TOP_UP_ROUNDS: usize = 8;
const LOOP_POINT_TOP_UP_RETRIES: usize = 8;

/// Decoder reads with repeat-mode semantics layered on top.
///
/// Mode off: a zero-frame read means end of content. Repeat-set: advance the
/// subtune when there is one, else restart, retry once. Loop-point: zero
/// reads at the wrap are spurious, retry hard and top up short chunks so no
/// silence lands at the loop boundary. Repeat-current: restart, retry once.
pub(crate) struct RepeatAwareReader<'a> {
    pub decoder: &'a mut dyn Decoder,
    pub channels: usize,
    pub timeline: &'a mut TimelineState,
    pub shared: &'a EngineShared,
}

impl RepeatAwareReader<'_> {
    /// Restart playback at zero and rebase every position derivation.
    fn restart_at_zero(&mut self) {
        self.decoder.seek(0.0);
        self.shared.position_seconds.store(0.0);
        self.timeline.rebase(0.0);
    }

    /// Advance to the next subtune, wrapping to the first; plain restart when
    /// there is only one or selection fails.
    fn advance_track_set(&mut self) {
        let subtune_count = self.decoder.subtune_count().max(1);
        if subtune_count > 1 {
            let current = self.decoder.current_subtune().min(subtune_count - 1);
            let switched = if current + 1 < subtune_count {
                self.decoder.select_subtune(current + 1)
            } else {
                let wrapped = self.decoder.select_subtune(0);
                if wrapped {
                    self.decoder.seek(0.0);
                }
                wrapped
            };
            if !switched {
                self.decoder.seek(0.0);
            }
            self.shared.position_seconds.store(0.0);
            self.timeline.rebase(0.0);
        } else {
            self.restart_at_zero();
        }
    }
}

impl ChunkReader for RepeatAwareReader<'_> {
    fn read_chunk(&mut self, buffer: &mut [f32], frames: usize) -> ReadOutcome {
        let mode = self.shared.repeat_mode();
        let channels = self.channels;

        let frames_read = self.decoder.read(buffer, frames);
        if frames_read > 0 {
            if mode == RepeatMode::LoopPoint && frames_read < frames {
                // Keep filling in loop-point mode so a short chunk around the
                // wrap boundary does not insert silence.
                let mut total = frames_read;
                'rounds: for _ in 0..LOOP_POINT_TOP_UP_ROUNDS {
                    if total >= frames {
                        break;
                    }
                    let remaining = frames - total;
                    let window = &mut buffer[total * channels..(total + remaining) * channels];
                    let mut more = self.decoder.read(window, remaining);
                    if more == 0 {
                        let mut recovered = false;
                        for _ in 0..LOOP_POINT_TOP_UP_RETRIES {
                            more = self.decoder.read(window, remaining);
                            if more > 0 {
                                recovered = true;
                                break;
                            }
                        }
                        if !recovered {
                            break 'rounds;
                        }
                    }
                    total += more;
                }
                return ReadOutcome {
                    frames: total,
                    ..ReadOutcome::default()
                };
            }
            return ReadOutcome {
                frames: frames_read,
                ..ReadOutcome::default()
            };
        }

        if mode == RepeatMode::LoopPoint {
            // Loop-point wraps can surface as transient zero-frame reads.
            for _ in 0..LOOP_POINT_WRAP_RETRIES {
                let retried = self.decoder.read(buffer, frames);
                if retried > 0 {
                    return ReadOutcome {
                        frames: retried,
                        ..ReadOutcome::default()
                    };
                }
            }
        }

        if mode == RepeatMode::Current {
            self.restart_at_zero();
            let retried = self.decoder.read(buffer, frames);
            if retried > 0 {
                return ReadOutcome {
                    frames: retried,
                    reached_end: false,
                    pipeline_reset: true,
                };
            }
        }

        if mode == RepeatMode::TrackSet {
            self.advance_track_set();
            let retried = self.decoder.read(buffer, frames);
            if retried > 0 {
                return ReadOutcome {
                    frames: retried,
                    reached_end: false,
                    pipeline_reset: true,
                };
            }
        }

        ReadOutcome {
            frames: 0,
            reached_end: mode != RepeatMode::LoopPoint,
            pipeline_reset: false,
        }
    }

    fn note_input_consumed(&mut self, frames: usize) {
        self.timeline.absolute_input_frames += frames as i64;
    }
}

pub(crate) fn render_worker_loop(shared: Arc<EngineShared>) {
    promote_thread_for_audio("render-worker", -16);
    debug!("render worker started");

    let mut local: Vec<f32> = vec![0.0; 1024 * 2];

    loop {
        let base_target = (shared.chunk_frames.load(Ordering::Relaxed) * 2)
            .max(shared.target_frames.load(Ordering::Relaxed));
        let boost_active =
            monotonic_ns() < shared.recovery_boost_until_ns.load(Ordering::Relaxed);
        let target_frames = if boost_active {
            base_target * 3
        } else {
            base_target
        };

        let needs_fill = {
            let ring = shared.ring.lock().unwrap();
            let (ring, _timeout) = shared
                .render_cv
                .wait_timeout_while(ring, WORKER_TICK, |state| {
                    if state.stop {
                        return false;
                    }
                    if !shared.playing() || shared.seeking() {
                        return true;
                    }
                    state.ring.frames_available() >= target_frames
                })
                .unwrap();
            if ring.stop {
                break;
            }
            if !shared.playing() || shared.seeking() {
                continue;
            }
            ring.ring.frames_available() < target_frames
        };
        if !needs_fill {
            continue;
        }

        let chunk_frames = shared.chunk_frames.load(Ordering::Relaxed).max(256);
        let mut reached_end = false;
        let mut channels = 2usize;
        {
            let mut slot = shared.decoder.lock().unwrap();
            if slot.decoder.is_none() || !shared.playing() {
                continue;
            }

            let render_sample_rate = slot.render_sample_rate;
            let resampler_preference = crate::config::ResamplerPreference::from_index(
                shared.resampler_preference.load(Ordering::Relaxed),
            );

            let crate::playback::engine::core::DecoderSlot {
                decoder,
                resampler,
                timeline,
                dsp_bank,
                limiter,
                ..
            } = &mut *slot;
            let dec = decoder.as_deref_mut().expect("decoder checked above");

            channels = dec.channel_count().clamp(1, 2);
            local.resize(chunk_frames * channels, 0.0);

            let stream_rate = {
                let rate = shared.stream_sample_rate.load(Ordering::Relaxed);
                if rate > 0 {
                    rate
                } else {
                    48_000
                }
            };
            let discontinuous = dec.timeline_mode() == TimelineMode::Discontinuous;
            let decoder_name = dec.name();

            {
                let mut reader = RepeatAwareReader {
                    decoder: &mut *dec,
                    channels,
                    timeline: &mut *timeline,
                    shared: &shared,
                };
                resampler.render(
                    &mut reader,
                    &mut local,
                    chunk_frames,
                    channels,
                    stream_rate,
                    render_sample_rate,
                    resampler_preference,
                    discontinuous,
                    decoder_name,
                    &mut reached_end,
                );
            }

            let elapsed_seconds = chunk_frames as f64 / stream_rate as f64;
            let decoder_position = dec.playback_position_seconds();
            let duration = dec.duration_seconds();
            let mode = shared.repeat_mode();

            let update = timeline.reconcile(ReconcileInputs {
                elapsed_seconds,
                reached_end,
                decoder_rate: render_sample_rate,
                decoder_position,
                timeline_mode: dec.timeline_mode(),
                repeat_mode: mode,
                duration,
            });
            match update {
                PositionUpdate::Set(position) => shared.position_seconds.store(position),
                PositionUpdate::Advance(delta) => {
                    shared.position_seconds.fetch_add(delta);
                }
                PositionUpdate::Keep => {}
            }

            let gain_position = shared.position_seconds.load();
            let end_fade = end_fade_gain(
                shared.dsp.end_fade_config(),
                gain_position,
                duration,
                dec.playback_capabilities(),
                mode,
            );
            let (master_db, song_db, plugin_db) = shared.dsp.gain_snapshot();
            apply_gain(
                &mut local,
                chunk_frames,
                channels,
                master_db,
                song_db,
                plugin_db,
                end_fade,
            );
            let (mute_left, mute_right, solo_left, solo_right) = shared.dsp.routing_snapshot();
            apply_channel_routing(
                &mut local,
                chunk_frames,
                channels,
                mute_left,
                mute_right,
                solo_left,
                solo_right,
            );
            dsp_bank.process(
                &mut local,
                chunk_frames,
                channels,
                stream_rate,
                &shared.dsp.bank_params(),
            );
            apply_mono_downmix(&mut local, chunk_frames, channels, shared.dsp.force_mono());
            limiter.process(&mut local, chunk_frames, channels, shared.dsp.limiter_enabled());

            if reached_end && mode != RepeatMode::TrackSet && mode != RepeatMode::Current {
                if duration > 0.0 {
                    shared.position_seconds.store(duration);
                }
                if mode == RepeatMode::Off {
                    shared.natural_end_pending.store(true, Ordering::Relaxed);
                }
                shared.is_playing.store(false, Ordering::Relaxed);
                shared
                    .render_terminal_stop_pending
                    .store(true, Ordering::Relaxed);
            }
        }

        shared.append_ring(&local, chunk_frames, channels);

        if !shared.playing() && shared.render_terminal_stop_pending.load(Ordering::Relaxed) {
            shared.notify_render_all();
        }
    }

    debug!("render worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::resampler::ChunkReader;
    use crate::decoder::{Capabilities, RepeatCapabilities};
    use crate::playback::engine::test_support::bare_shared;
    use std::path::Path;

    /// Decoder scripted to return short/zero reads around a wrap.
    struct WrappingDecoder {
        reads: Vec<usize>,
        read_index: usize,
        seeks: Vec<f64>,
        subtunes: usize,
        current_subtune: usize,
        selected: Vec<usize>,
    }

    impl WrappingDecoder {
        fn new(reads: Vec<usize>) -> Self {
            Self {
                reads,
                read_index: 0,
                seeks: Vec::new(),
                subtunes: 1,
                current_subtune: 0,
                selected: Vec::new(),
            }
        }
    }

    impl Decoder for WrappingDecoder {
        fn open(&mut self, _path: &Path) -> bool {
            true
        }
        fn close(&mut self) {}
        fn read(&mut self, buffer: &mut [f32], frames: usize) -> usize {
            let scripted = self
                .reads
                .get(self.read_index)
                .copied()
                .unwrap_or(frames);
            self.read_index += 1;
            let produced = scripted.min(frames);
            buffer[..produced * 2].fill(0.5);
            produced
        }
        fn seek(&mut self, seconds: f64) {
            self.seeks.push(seconds);
        }
        fn duration_seconds(&mut self) -> f64 {
            3.0
        }
        fn sample_rate(&mut self) -> u32 {
            48_000
        }
        fn channel_count(&mut self) -> usize {
            2
        }
        fn playback_capabilities(&self) -> Capabilities {
            Capabilities::SEEK | Capabilities::LIVE_REPEAT_MODE
        }
        fn repeat_capabilities(&self) -> RepeatCapabilities {
            RepeatCapabilities::TRACK | RepeatCapabilities::LOOP_POINT
        }
        fn subtune_count(&self) -> usize {
            self.subtunes
        }
        fn current_subtune(&self) -> usize {
            self.current_subtune
        }
        fn select_subtune(&mut self, index: usize) -> bool {
            self.selected.push(index);
            self.current_subtune = index;
            true
        }
        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    #[test]
    fn mode_off_signals_end_on_zero_read() {
        let shared = bare_shared();
        let mut decoder = WrappingDecoder::new(vec![0]);
        let mut timeline = TimelineState::new();
        let mut reader = RepeatAwareReader {
            decoder: &mut decoder,
            channels: 2,
            timeline: &mut timeline,
            shared: &shared,
        };
        let mut buffer = vec![0.0f32; 64 * 2];
        let outcome = reader.read_chunk(&mut buffer, 64);
        assert_eq!(outcome.frames, 0);
        assert!(outcome.reached_end);
    }

    #[test]
    fn loop_point_retries_through_wrap() {
        let shared = bare_shared();
        shared
            .repeat_mode
            .store(RepeatMode::LoopPoint.index(), Ordering::Relaxed);
        // 20 spurious zero reads at the wrap, then data again.
        let mut reads = vec![0usize; 20];
        reads.push(64);
        let mut decoder = WrappingDecoder::new(reads);
        let mut timeline = TimelineState::new();
        let mut reader = RepeatAwareReader {
            decoder: &mut decoder,
            channels: 2,
            timeline: &mut timeline,
            shared: &shared,
        };
        let mut buffer = vec![0.0f32; 64 * 2];
        let outcome = reader.read_chunk(&mut buffer, 64);
        assert_eq!(outcome.frames, 64);
        assert!(!outcome.reached_end);
    }

    #[test]
    fn loop_point_tops_up_short_reads() {
        let shared = bare_shared();
        shared
            .repeat_mode
            .store(RepeatMode::LoopPoint.index(), Ordering::Relaxed);
        // A short read followed by more data.
        let mut decoder = WrappingDecoder::new(vec![16, 0, 48]);
        let mut timeline = TimelineState::new();
        let mut reader = RepeatAwareReader {
            decoder: &mut decoder,
            channels: 2,
            timeline: &mut timeline,
            shared: &shared,
        };
        let mut buffer = vec![0.0f32; 64 * 2];
        let outcome = reader.read_chunk(&mut buffer, 64);
        assert_eq!(outcome.frames, 64);
    }

    #[test]
    fn repeat_current_restarts_and_flags_reset() {
        let shared = bare_shared();
        shared
            .repeat_mode
            .store(RepeatMode::Current.index(), Ordering::Relaxed);
        shared.position_seconds.store(2.9);
        let mut decoder = WrappingDecoder::new(vec![0, 64]);
        let mut timeline = TimelineState::new();
        timeline.rebase(2.9);
        let mut reader = RepeatAwareReader {
            decoder: &mut decoder,
            channels: 2,
            timeline: &mut timeline,
            shared: &shared,
        };
        let mut buffer = vec![0.0f32; 64 * 2];
        let outcome = reader.read_chunk(&mut buffer, 64);
        assert_eq!(outcome.frames, 64);
        assert!(outcome.pipeline_reset);
        assert_eq!(decoder.seeks, vec![0.0]);
        assert_eq!(shared.position_seconds.load(), 0.0);
    }

    #[test]
    fn repeat_set_advances_subtune() {
        let shared = bare_shared();
        shared
            .repeat_mode
            .store(RepeatMode::TrackSet.index(), Ordering::Relaxed);
        let mut decoder = WrappingDecoder::new(vec![0, 64]);
        decoder.subtunes = 3;
        decoder.current_subtune = 0;
        let mut timeline = TimelineState::new();
        let mut reader = RepeatAwareReader {
            decoder: &mut decoder,
            channels: 2,
            timeline: &mut timeline,
            shared: &shared,
        };
        let mut buffer = vec![0.0f32; 64 * 2];
        let outcome = reader.read_chunk(&mut buffer, 64);
        assert_eq!(outcome.frames, 64);
        assert!(outcome.pipeline_reset);
        assert_eq!(decoder.selected, vec![1]);
    }

    #[test]
    fn repeat_set_wraps_to_first_subtune() {
        let shared = bare_shared();
        shared
            .repeat_mode
            .store(RepeatMode::TrackSet.index(), Ordering::Relaxed);
        let mut decoder = WrappingDecoder::new(vec![0, 64]);
        decoder.subtunes = 2;
        decoder.current_subtune = 1;
        let mut timeline = TimelineState::new();
        let mut reader = RepeatAwareReader {
            decoder: &mut decoder,
            channels: 2,
            timeline: &mut timeline,
            shared: &shared,
        };
        let mut buffer = vec![0.0f32; 64 * 2];
        reader.read_chunk(&mut buffer, 64);
        assert_eq!(decoder.selected, vec![0]);
        assert_eq!(decoder.seeks, vec![0.0]);
    }
}
