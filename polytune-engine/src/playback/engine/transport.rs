//! Transport operations: source selection, start/stop, seeks, repeat modes,
//! position/duration readouts.

use crate::decoder::{Capabilities, RepeatCapabilities, RepeatMode};
use crate::error::{Error, Result};
use crate::playback::engine::core::SeekRequest;
use crate::playback::engine::stream::{open_stream, recover_stream_if_needed};
use crate::playback::engine::PlayerEngine;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Startup prefill wait toward the target watermark.
const STARTUP_PREFILL_WAIT: Duration = Duration::from_millis(220);
const STARTUP_PREFILL_POLL: Duration = Duration::from_millis(2);
/// Startup preroll burst clamp, frames.
const PREROLL_MIN_FRAMES: usize = 128;
const PREROLL_MAX_FRAMES: usize = 2048;
/// A position this close to the duration counts as "at the end".
const END_EPSILON_SECONDS: f64 = 0.01;

impl PlayerEngine {
    /// Replace the active source. The previous decoder is destroyed before
    /// the new one is created; on failure the slot is left empty.
    pub fn set_source(&self, path: &Path) -> Result<()> {
        let shared = &self.shared;
        info!(path = %path.display(), "source set");

        // Quiesce background seek work before replacing the decoder so a
        // worker-thread read cannot race decoder teardown.
        if shared.seeking() {
            {
                let mut seek = shared.seek.lock().unwrap();
                shared.seek_abort.store(true, Ordering::Relaxed);
                seek.pending = None;
            }
            shared.seek_cv.notify_one();
            while shared.seeking() {
                std::thread::sleep(Duration::from_millis(1));
            }
        }

        shared.decoder_serial.fetch_add(1, Ordering::Relaxed);
        shared.clear_ring();

        // Drop any previously loaded decoder first. If opening the new source
        // fails, playback must not continue from stale decoder state.
        {
            let mut slot = shared.decoder.lock().unwrap();
            slot.decoder = None;
            shared.cached_duration_seconds.store(0.0);
            slot.resampler.reset();
            slot.dsp_bank.reset();
            slot.limiter.reset();
            slot.render_sample_rate = shared.stream_sample_rate.load(Ordering::Relaxed);
            shared.position_seconds.store(0.0);
            slot.timeline.rebase(0.0);
            shared.natural_end_pending.store(false, Ordering::Relaxed);
        }
        {
            let mut seek = shared.seek.lock().unwrap();
            seek.pending = None;
            shared.seek_abort.store(false, Ordering::Relaxed);
            shared.seek_in_progress.store(false, Ordering::Relaxed);
            shared.stop_stream_after_seek.store(false, Ordering::Relaxed);
        }

        let mut new_decoder = shared.registry.create_for_path(path).ok_or_else(|| {
            error!(path = %path.display(), "no decoder for source");
            Error::NoDecoder {
                path: path.display().to_string(),
            }
        })?;

        let (target_rate, cached_options) = {
            let slot = shared.decoder.lock().unwrap();
            let rate = slot.resolve_output_sample_rate(
                new_decoder.name(),
                shared.stream_sample_rate.load(Ordering::Relaxed),
            );
            (rate, slot.core_options.get(new_decoder.name()).cloned())
        };

        new_decoder.set_output_sample_rate(target_rate);
        if let Some(options) = &cached_options {
            for (name, value) in options {
                new_decoder.set_option(name, value);
            }
        }
        if !new_decoder.open(path) {
            error!(path = %path.display(), decoder = new_decoder.name(), "failed to open source");
            return Err(Error::SourceOpen {
                path: path.display().to_string(),
                decoder: new_decoder.name().to_string(),
            });
        }

        {
            let mut slot = shared.decoder.lock().unwrap();
            slot.render_sample_rate = new_decoder.sample_rate();
            new_decoder.set_repeat_mode(shared.repeat_mode());
            if let Some(options) = &cached_options {
                for (name, value) in options {
                    new_decoder.set_option(name, value);
                }
            }
            slot.decoder = Some(new_decoder);
            let duration = slot.decoder.as_deref_mut().unwrap().duration_seconds();
            shared.cached_duration_seconds.store(duration);
            slot.resampler.reset();
            shared.position_seconds.store(0.0);
            slot.timeline.rebase(0.0);
            shared.natural_end_pending.store(false, Ordering::Relaxed);
        }
        shared.notify_render();
        Ok(())
    }

    /// Begin (or resume) playback.
    pub fn start(&self) -> Result<()> {
        recover_stream_if_needed(&self.shared);
        let shared = &self.shared;

        let mut stream = shared.stream.lock().unwrap();
        let needs_open = stream.output.is_none()
            || shared.stream_needs_rebuild.swap(false, Ordering::Relaxed)
            || stream
                .output
                .as_ref()
                .map(|output| output.is_disconnected())
                .unwrap_or(true);
        if needs_open {
            open_stream(&self.shared, &mut stream)?;
        }

        {
            let mut guard = shared.decoder.lock().unwrap();
            let stream_rate = shared.stream_sample_rate.load(Ordering::Relaxed);
            let current_position = shared.position_seconds.load();
            let loop_point_mode = shared.repeat_mode() == RepeatMode::LoopPoint;
            let slot = &mut *guard;
            if let Some(decoder) = slot.decoder.as_deref_mut() {
                let desired = slot
                    .core_sample_rates
                    .get(decoder.name())
                    .copied()
                    .filter(|rate| *rate > 0)
                    .unwrap_or(if stream_rate > 0 { stream_rate } else { 48_000 });
                decoder.set_output_sample_rate(desired);
                slot.render_sample_rate = decoder.sample_rate();
                slot.resampler.reset();
                slot.timeline.rebase(current_position);

                // Starting at (or within a hair of) the end restarts from zero.
                let duration = decoder.duration_seconds();
                if duration > 0.0
                    && !loop_point_mode
                    && current_position >= duration - END_EPSILON_SECONDS
                {
                    decoder.seek(0.0);
                    shared.position_seconds.store(0.0);
                    slot.resampler.reset();
                    slot.timeline.rebase(0.0);
                }
            }
            slot.limiter.reset();
            shared.fade.lock().unwrap().reset();
        }

        // Prime the render ring before delivery begins. This avoids audible
        // startup gaps for decoders that need a short warmup and reduces
        // first-second underruns.
        shared.clear_ring();
        shared.is_playing.store(true, Ordering::Relaxed);
        shared.natural_end_pending.store(false, Ordering::Relaxed);

        let startup_chunk = shared.chunk_frames.load(Ordering::Relaxed).max(256);
        let startup_base_target = (startup_chunk * 2)
            .max(shared.target_frames.load(Ordering::Relaxed).min(4096));
        let mut preroll_frames = 0usize;
        if stream.startup_preroll_pending {
            let burst = stream
                .output
                .as_ref()
                .map(|output| output.burst_frames())
                .filter(|frames| *frames > 0)
                .unwrap_or(startup_chunk);
            preroll_frames = burst.clamp(PREROLL_MIN_FRAMES, PREROLL_MAX_FRAMES);
            let silence = vec![0.0f32; preroll_frames * 2];
            shared.append_ring(&silence, preroll_frames, 2);
            debug!(frames = preroll_frames, "applying one-time startup preroll");
        }
        let startup_target = startup_base_target + preroll_frames;
        shared.notify_render();
        let prefill_deadline = Instant::now() + STARTUP_PREFILL_WAIT;
        while shared.ring_frames() < startup_target && Instant::now() < prefill_deadline {
            std::thread::sleep(STARTUP_PREFILL_POLL);
            shared.notify_render();
        }

        let started = stream
            .output
            .as_mut()
            .map(|output| output.request_start())
            .unwrap_or(false);
        if !started {
            // One rebuild-and-retry before giving up.
            if open_stream(&self.shared, &mut stream).is_err() {
                shared.is_playing.store(false, Ordering::Relaxed);
                return Err(Error::StreamStart);
            }
            let retried = stream
                .output
                .as_mut()
                .map(|output| output.request_start())
                .unwrap_or(false);
            if !retried {
                error!("retry start failed");
                shared.is_playing.store(false, Ordering::Relaxed);
                return Err(Error::StreamStart);
            }
        }
        stream.startup_preroll_pending = false;
        shared.notify_render_all();
        Ok(())
    }

    /// Stop playback. A stop during an async seek cancels the scan instead of
    /// waiting for it.
    pub fn stop(&self) {
        let shared = &self.shared;
        shared.pending_pause_fade.store(false, Ordering::Relaxed);
        shared.pending_resume_fade.store(false, Ordering::Relaxed);

        if shared.seeking() {
            shared.decoder_serial.fetch_add(1, Ordering::Relaxed);
            {
                let mut seek = shared.seek.lock().unwrap();
                shared.seek_abort.store(true, Ordering::Relaxed);
                seek.pending = None;
            }
            shared.stop_stream_after_seek.store(true, Ordering::Relaxed);
            shared.seek_cv.notify_one();
            shared.is_playing.store(false, Ordering::Relaxed);
            shared.natural_end_pending.store(false, Ordering::Relaxed);
            shared.clear_ring();
            shared.notify_render_all();
            return;
        }

        let mut stream = shared.stream.lock().unwrap();
        if let Some(output) = stream.output.as_mut() {
            shared.resume_after_rebuild.store(false, Ordering::Relaxed);
            output.request_stop();
            shared.is_playing.store(false, Ordering::Relaxed);
            shared.natural_end_pending.store(false, Ordering::Relaxed);
            shared.clear_ring();
            shared.notify_render_all();
        }
    }

    /// Start with a resume fade from the floor gain up to unity.
    pub fn start_with_pause_resume_fade(&self, duration_ms: i32, attenuation_db: f32) -> Result<()> {
        if self.is_playing() {
            return Ok(());
        }
        let shared = &self.shared;
        shared
            .pending_resume_fade_ms
            .store(duration_ms, Ordering::Relaxed);
        shared.pending_resume_fade_db.store(attenuation_db);
        shared.pending_resume_fade.store(true, Ordering::Relaxed);
        self.start()
    }

    /// Stop after a pause fade down to the floor gain.
    pub fn stop_with_pause_resume_fade(&self, duration_ms: i32, attenuation_db: f32) {
        let shared = &self.shared;
        if !self.is_playing() || shared.seeking() {
            self.stop();
            return;
        }
        shared
            .pending_pause_fade_ms
            .store(duration_ms, Ordering::Relaxed);
        shared.pending_pause_fade_db.store(attenuation_db);
        shared.pending_pause_fade.store(true, Ordering::Relaxed);
        shared.notify_render_all();
    }

    pub fn restart(&self) -> Result<()> {
        self.stop();
        self.start()
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing()
    }

    /// Seek. Direct-seek-capable decoders resolve synchronously; everything
    /// else publishes the optimistic target and hands the work to the seek
    /// worker.
    pub fn seek_to(&self, seconds: f64) {
        let shared = &self.shared;
        let serial = shared.decoder_serial.load(Ordering::Relaxed);
        let target = seconds.max(0.0);
        shared.clear_ring();

        // Cancel any pending async request first so a stale worker cycle
        // cannot overwrite a direct-seek result.
        {
            let mut seek = shared.seek.lock().unwrap();
            shared.seek_abort.store(true, Ordering::Relaxed);
            seek.pending = None;
        }
        shared.seek_cv.notify_one();

        let mut handled_direct = false;
        {
            let mut guard = shared.decoder.lock().unwrap();
            let slot = &mut *guard;
            if let Some(decoder) = slot.decoder.as_deref_mut() {
                let capabilities = decoder.playback_capabilities();
                if capabilities.contains(Capabilities::DIRECT_SEEK)
                    && capabilities.contains(Capabilities::SEEK)
                {
                    shared.direct_seek_active.store(true, Ordering::Relaxed);
                    decoder.seek(target);
                    let decoder_position = decoder.playback_position_seconds();
                    let resolved = if decoder_position >= 0.0 {
                        decoder_position
                    } else {
                        target
                    };
                    shared
                        .cached_duration_seconds
                        .store(decoder.duration_seconds());
                    slot.resampler.reset();
                    shared.position_seconds.store(resolved);
                    slot.timeline.rebase(resolved);
                    shared.natural_end_pending.store(false, Ordering::Relaxed);
                    shared.direct_seek_active.store(false, Ordering::Relaxed);
                    handled_direct = true;
                }
            }
        }

        if handled_direct {
            let _seek = shared.seek.lock().unwrap();
            shared.seek_abort.store(false, Ordering::Relaxed);
            shared.seek_in_progress.store(false, Ordering::Relaxed);
            shared.stop_stream_after_seek.store(false, Ordering::Relaxed);
            shared.notify_render();
            return;
        }

        // Publish the optimistic target so UI polls observe it before the
        // scan resolves.
        shared.position_seconds.store(target);
        shared.natural_end_pending.store(false, Ordering::Relaxed);
        {
            let mut seek = shared.seek.lock().unwrap();
            shared.seek_abort.store(false, Ordering::Relaxed);
            seek.pending = Some(SeekRequest {
                target_seconds: target,
                decoder_serial: serial,
            });
            shared.seek_in_progress.store(true, Ordering::Relaxed);
        }
        shared.seek_cv.notify_one();
        shared.notify_render();
    }

    pub fn is_seek_in_progress(&self) -> bool {
        self.shared.seeking()
    }

    pub fn position_seconds(&self) -> f64 {
        recover_stream_if_needed(&self.shared);
        self.shared.position_seconds.load()
    }

    /// Duration of the active source. Never blocks on the decoder: returns
    /// the cached value while seeking or while the decoder lock is contended.
    pub fn duration_seconds(&self) -> f64 {
        recover_stream_if_needed(&self.shared);
        let shared = &self.shared;
        if shared.seeking() {
            return shared.cached_duration_seconds.load();
        }
        let Ok(mut slot) = shared.decoder.try_lock() else {
            return shared.cached_duration_seconds.load();
        };
        let Some(decoder) = slot.decoder.as_deref_mut() else {
            return 0.0;
        };
        let duration = decoder.duration_seconds();
        shared.cached_duration_seconds.store(duration);
        duration
    }

    /// Consume the natural-end event (exchange-reset semantics). Set only
    /// when repeat is off and the decoder actually ended.
    pub fn consume_natural_end_event(&self) -> bool {
        self.shared.natural_end_pending.swap(false, Ordering::Relaxed)
    }

    /// Alias for repeat mode off/track-set.
    pub fn set_looping(&self, enabled: bool) {
        self.set_repeat_mode(if enabled {
            RepeatMode::TrackSet
        } else {
            RepeatMode::Off
        });
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.shared.repeat_mode()
    }

    /// Change the repeat mode. Leaving LOOP_POINT while already at/past the
    /// end applies the new semantics immediately instead of waiting for a
    /// future decoder terminal event that may not occur promptly.
    pub fn set_repeat_mode(&self, mode: RepeatMode) {
        let shared = &self.shared;
        let previous =
            RepeatMode::from_index(shared.repeat_mode.swap(mode.index(), Ordering::Relaxed));
        let mut stop_for_terminal_state = false;

        {
            let mut guard = shared.decoder.lock().unwrap();
            let current_position = shared.position_seconds.load();
            let slot = &mut *guard;
            if let Some(decoder) = slot.decoder.as_deref_mut() {
                decoder.set_repeat_mode(mode);

                if previous == RepeatMode::LoopPoint && mode != RepeatMode::LoopPoint {
                    let duration = decoder.duration_seconds();
                    let decoder_position = decoder.playback_position_seconds();
                    let capabilities = decoder.playback_capabilities();
                    let ui_at_end =
                        duration > 0.0 && current_position >= duration - END_EPSILON_SECONDS;
                    let decoder_at_end = duration > 0.0
                        && decoder_position >= 0.0
                        && decoder_position >= duration - END_EPSILON_SECONDS;
                    // A decoder that can both seek directly and report a
                    // trustworthy duration must confirm the end itself;
                    // otherwise the published position decides.
                    let require_confirmation = capabilities.contains(Capabilities::DIRECT_SEEK)
                        && capabilities.contains(Capabilities::RELIABLE_DURATION);
                    let at_end = if require_confirmation {
                        ui_at_end && decoder_at_end
                    } else {
                        ui_at_end
                    };

                    if at_end {
                        match mode {
                            RepeatMode::TrackSet => {
                                let subtune_count = decoder.subtune_count().max(1);
                                if subtune_count > 1 {
                                    let current =
                                        decoder.current_subtune().min(subtune_count - 1);
                                    let next = (current + 1) % subtune_count;
                                    if !decoder.select_subtune(next) {
                                        decoder.seek(0.0);
                                    }
                                } else {
                                    decoder.seek(0.0);
                                }
                                slot.resampler.reset();
                                shared.position_seconds.store(0.0);
                                slot.timeline.rebase(0.0);
                                shared.natural_end_pending.store(false, Ordering::Relaxed);
                            }
                            RepeatMode::Current => {
                                decoder.seek(0.0);
                                slot.resampler.reset();
                                shared.position_seconds.store(0.0);
                                slot.timeline.rebase(0.0);
                                shared.natural_end_pending.store(false, Ordering::Relaxed);
                            }
                            RepeatMode::Off => {
                                stop_for_terminal_state = true;
                                shared.natural_end_pending.store(true, Ordering::Relaxed);
                            }
                            RepeatMode::LoopPoint => {}
                        }
                    }
                }
            }
        }

        if stop_for_terminal_state {
            let mut stream = shared.stream.lock().unwrap();
            if let Some(output) = stream.output.as_mut() {
                output.request_stop();
            }
            shared.is_playing.store(false, Ordering::Relaxed);
        }
    }

    /// Repeat modes the active decoder supports natively.
    pub fn repeat_capabilities(&self) -> RepeatCapabilities {
        let slot = self.shared.decoder.lock().unwrap();
        slot.decoder
            .as_deref()
            .map(|decoder| decoder.repeat_capabilities())
            .unwrap_or(RepeatCapabilities::TRACK)
    }

    /// Playback capabilities of the active decoder.
    pub fn playback_capabilities(&self) -> Capabilities {
        let slot = self.shared.decoder.lock().unwrap();
        slot.decoder
            .as_deref()
            .map(|decoder| decoder.playback_capabilities())
            .unwrap_or(
                Capabilities::SEEK
                    | Capabilities::RELIABLE_DURATION
                    | Capabilities::LIVE_REPEAT_MODE,
            )
    }

    /// Select a subtune on the active decoder and rebase the timeline.
    pub fn select_subtune(&self, index: usize) -> bool {
        let shared = &self.shared;
        let mut guard = shared.decoder.lock().unwrap();
        let slot = &mut *guard;
        let Some(decoder) = slot.decoder.as_deref_mut() else {
            return false;
        };
        if !decoder.select_subtune(index) {
            return false;
        }
        decoder.seek(0.0);
        slot.resampler.reset();
        shared.position_seconds.store(0.0);
        slot.timeline.rebase(0.0);
        shared.natural_end_pending.store(false, Ordering::Relaxed);
        drop(guard);
        shared.clear_ring();
        shared.notify_render();
        true
    }

    pub fn subtune_count(&self) -> usize {
        let slot = self.shared.decoder.lock().unwrap();
        slot.decoder
            .as_deref()
            .map(|decoder| decoder.subtune_count())
            .unwrap_or(0)
    }

    pub fn current_subtune(&self) -> usize {
        let slot = self.shared.decoder.lock().unwrap();
        slot.decoder
            .as_deref()
            .map(|decoder| decoder.current_subtune())
            .unwrap_or(0)
    }
}
