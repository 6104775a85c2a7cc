//! Stream lifecycle and the hot callback path
//!
//! The engine is the `RenderSource` every backend pulls from. The per-buffer
//! path never blocks: it takes the ring mutex for one copy, walks the
//! pause/resume fade envelope, feeds the visualization tap when demanded, and
//! decides whether the stream should stop after this buffer.

use crate::audio::output::{OutputStream, RenderSource};
use crate::error::Result;
use crate::playback::engine::core::{EngineShared, StreamSlot};
use crate::util::monotonic_ns;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Underrun recovery boost window.
const RECOVERY_BOOST_NS: u64 = 2_500_000_000;
/// Underrun debug-log throttle.
const UNDERRUN_LOG_INTERVAL_NS: u64 = 1_000_000_000;

impl EngineShared {
    /// Fill one output buffer. Returns true when the stream should stop.
    pub(crate) fn render_output_frames(
        &self,
        out: &mut [f32],
        frames: usize,
        callback_rate: u32,
    ) -> bool {
        if frames == 0 {
            return false;
        }
        if self.seeking() {
            out[..frames * 2].fill(0.0);
            return false;
        }

        let rate = if callback_rate > 0 { callback_rate } else { 48_000 };
        if self.pending_resume_fade.swap(false, Ordering::Relaxed) {
            self.fade.lock().unwrap().begin(
                true,
                rate,
                self.pending_resume_fade_ms.load(Ordering::Relaxed),
                self.pending_resume_fade_db.load(),
            );
        }
        if self.pending_pause_fade.swap(false, Ordering::Relaxed) {
            self.fade.lock().unwrap().begin(
                false,
                rate,
                self.pending_pause_fade_ms.load(Ordering::Relaxed),
                self.pending_pause_fade_db.load(),
            );
        }

        self.callback_count.fetch_add(1, Ordering::Relaxed);
        let copied = self.ring.lock().unwrap().ring.pop(out, frames);
        if copied < frames {
            let missing = (frames - copied) as u64;
            let now_ns = monotonic_ns();
            // Hold a higher ring target briefly after an underrun to absorb
            // transient CPU spikes.
            self.recovery_boost_until_ns
                .store(now_ns + RECOVERY_BOOST_NS, Ordering::Relaxed);
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
            self.underrun_frames.fetch_add(missing, Ordering::Relaxed);
            let last_log = self.last_underrun_log_ns.load(Ordering::Relaxed);
            if now_ns.saturating_sub(last_log) > UNDERRUN_LOG_INTERVAL_NS {
                debug!(
                    missing,
                    callbacks = self.callback_count.load(Ordering::Relaxed),
                    underruns = self.underrun_count.load(Ordering::Relaxed),
                    total_missing_frames = self.underrun_frames.load(Ordering::Relaxed),
                    "render ring underrun"
                );
                self.last_underrun_log_ns.store(now_ns, Ordering::Relaxed);
            }
            out[copied * 2..frames * 2].fill(0.0);
        }

        let fade_out_stop = {
            let mut fade = self.fade.lock().unwrap();
            for frame in 0..frames {
                let gain = fade.next_gain();
                if gain == 1.0 {
                    continue;
                }
                out[frame * 2] *= gain;
                out[frame * 2 + 1] *= gain;
            }
            fade.take_stop_pending()
        };

        if self.visualization.should_update() {
            self.visualization.update_from_callback(out, frames, 2, rate);
        }

        if fade_out_stop {
            self.is_playing.store(false, Ordering::Relaxed);
            self.natural_end_pending.store(false, Ordering::Relaxed);
            self.clear_ring();
            self.notify_render_all();
            return true;
        }

        if self.render_terminal_stop_pending.load(Ordering::Relaxed) && self.ring_frames() == 0 {
            self.render_terminal_stop_pending.store(false, Ordering::Relaxed);
            return true;
        }

        self.notify_render();
        false
    }
}

impl RenderSource for EngineShared {
    fn pull_frames(&self, out: &mut [f32], frames: usize, callback_rate: u32) -> bool {
        self.render_output_frames(out, frames, callback_rate)
    }

    fn buffered_frames(&self) -> usize {
        self.ring_frames()
    }

    fn request_more(&self) {
        self.notify_render();
    }

    fn on_stream_error(&self, description: &str) {
        error!(description, "stream error callback");
        self.resume_after_rebuild
            .store(self.playing(), Ordering::Relaxed);
        self.is_playing.store(false, Ordering::Relaxed);
        self.stream_needs_rebuild.store(true, Ordering::Relaxed);
    }
}

/// (Re)open the output stream inside an already-locked stream slot.
pub(crate) fn open_stream(shared: &Arc<EngineShared>, slot: &mut StreamSlot) -> Result<()> {
    slot.output = None;
    let mut params = slot.params.clone();
    params.sample_rate_hint = shared.stream_sample_rate.load(Ordering::Relaxed);
    let source: Arc<dyn RenderSource> = Arc::clone(shared) as Arc<dyn RenderSource>;
    let output = OutputStream::open(&params, &shared.hooks, source)?;
    shared
        .stream_sample_rate
        .store(output.sample_rate(), Ordering::Relaxed);
    slot.startup_preroll_pending = true;
    slot.output = Some(output);
    Ok(())
}

/// Re-apply the configured decoder rate after a stream rebuild, preserving
/// the timeline so playback does not glitch backward.
fn reapply_decoder_rate_preserving(shared: &EngineShared) {
    let mut guard = shared.decoder.lock().unwrap();
    let stream_rate = shared.stream_sample_rate.load(Ordering::Relaxed);
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
        slot.timeline.mark_smoother_dirty();
    }
}

/// Rebuild the stream after a pipeline config change, preserving playback.
pub(crate) fn reconfigure_stream(shared: &Arc<EngineShared>, resume_playback: bool) {
    let should_resume = resume_playback && shared.playing();
    let mut stream = shared.stream.lock().unwrap();
    if let Some(output) = stream.output.as_mut() {
        output.request_stop();
    }
    shared.is_playing.store(false, Ordering::Relaxed);

    if let Err(e) = open_stream(shared, &mut stream) {
        warn!(error = %e, "stream reconfigure failed");
        return;
    }

    reapply_decoder_rate_preserving(shared);

    if !should_resume {
        return;
    }

    shared.natural_end_pending.store(false, Ordering::Relaxed);
    shared.is_playing.store(true, Ordering::Relaxed);
    shared.notify_render_all();

    let started = stream
        .output
        .as_mut()
        .map(|output| output.request_start())
        .unwrap_or(false);
    if started {
        stream.startup_preroll_pending = false;
        shared.notify_render_all();
    } else {
        error!("reconfigure resume start failed");
        shared.is_playing.store(false, Ordering::Relaxed);
    }
}

/// Service a latched stream rebuild (backend error callback). Called at each
/// facade entry point; skips silently when another caller holds the slot.
pub(crate) fn recover_stream_if_needed(shared: &Arc<EngineShared>) {
    if !shared.stream_needs_rebuild.load(Ordering::Relaxed) {
        return;
    }
    let Ok(mut stream) = shared.stream.try_lock() else {
        return;
    };
    if !shared.stream_needs_rebuild.swap(false, Ordering::Relaxed) {
        return;
    }

    if let Err(e) = open_stream(shared, &mut stream) {
        warn!(error = %e, "stream recovery failed");
        return;
    }

    reapply_decoder_rate_preserving(shared);

    if shared.resume_after_rebuild.swap(false, Ordering::Relaxed) {
        let started = stream
            .output
            .as_mut()
            .map(|output| output.request_start())
            .unwrap_or(false);
        if started {
            shared.is_playing.store(true, Ordering::Relaxed);
        }
    }
}
