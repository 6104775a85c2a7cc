//! Seek worker
//!
//! One dedicated thread executes seeks that must not block the caller:
//! direct seeks for capable decoders, otherwise a scan seek that discard-reads
//! forward from zero. The request slot holds at most one entry; a new request
//! overwrites the pending one, and a running scan re-checks the slot at chunk
//! granularity so cancellation lands within one read. A scan that started
//! under one decoder serial never publishes after the decoder was replaced.

use crate::decoder::{Capabilities, RepeatMode};
use crate::playback::engine::core::{DecoderSlot, EngineShared};
use crate::util::promote_thread_for_audio;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Frames discarded per scan iteration.
const SCAN_CHUNK_FRAMES: usize = 4096;

/// Run a seek on the already-locked decoder slot. Returns the resolved
/// position, preferring what the decoder reports over what was skipped.
pub(crate) fn run_seek_locked(
    slot: &mut DecoderSlot,
    shared: &EngineShared,
    target_seconds: f64,
    discard: &mut Vec<f32>,
) -> f64 {
    let render_sample_rate = slot.render_sample_rate;
    let Some(decoder) = slot.decoder.as_deref_mut() else {
        return 0.0;
    };

    let capabilities = decoder.playback_capabilities();
    if !capabilities.contains(Capabilities::SEEK) {
        let position = decoder.playback_position_seconds();
        return position.max(0.0);
    }
    let clamped_target = target_seconds.max(0.0);

    // Prefer the decoder's own random access when it is reliable; it still
    // runs on this worker so callers stay non-blocking.
    if capabilities.contains(Capabilities::DIRECT_SEEK) {
        decoder.seek(clamped_target);
        let position = decoder.playback_position_seconds();
        return if position >= 0.0 { position } else { clamped_target };
    }

    decoder.seek(0.0);
    let channels = decoder.channel_count().max(1);
    let decoder_rate = {
        let rate = if render_sample_rate > 0 {
            render_sample_rate
        } else {
            decoder.sample_rate()
        };
        if rate > 0 {
            rate
        } else {
            48_000
        }
    };

    let target_frames = (clamped_target * decoder_rate as f64).round() as i64;
    let mut skipped_frames: i64 = 0;

    while skipped_frames < target_frames {
        {
            let seek = shared.seek.lock().unwrap();
            if seek.pending.is_some() || seek.stop || shared.seek_abort.load(Ordering::Relaxed) {
                break;
            }
        }
        let frames_to_read =
            (SCAN_CHUNK_FRAMES as i64).min(target_frames - skipped_frames) as usize;
        let needed_samples = frames_to_read * channels;
        if discard.len() < needed_samples {
            discard.resize(needed_samples, 0.0);
        }
        let frames_read = decoder.read(&mut discard[..needed_samples], frames_to_read);
        if frames_read == 0 {
            break;
        }
        skipped_frames += frames_read as i64;
    }

    let position = decoder.playback_position_seconds();
    if position >= 0.0 {
        position
    } else {
        skipped_frames as f64 / decoder_rate as f64
    }
}

pub(crate) fn seek_worker_loop(shared: Arc<EngineShared>) {
    promote_thread_for_audio("seek-worker", -8);
    debug!("seek worker started");

    let mut discard: Vec<f32> = Vec::new();

    loop {
        let request = {
            let seek = shared.seek.lock().unwrap();
            let mut seek = shared
                .seek_cv
                .wait_while(seek, |state| !state.stop && state.pending.is_none())
                .unwrap();
            if seek.stop {
                break;
            }
            seek.pending.take().expect("pending request present")
        };

        if request.decoder_serial == shared.decoder_serial.load(Ordering::Relaxed)
            && !shared.seek_abort.load(Ordering::Relaxed)
        {
            let mut slot = shared.decoder.lock().unwrap();
            if slot.decoder.is_some() {
                let mut resolved =
                    run_seek_locked(&mut slot, &shared, request.target_seconds, &mut discard);

                if !shared.seek_abort.load(Ordering::Relaxed)
                    && request.decoder_serial == shared.decoder_serial.load(Ordering::Relaxed)
                {
                    let duration = slot
                        .decoder
                        .as_deref_mut()
                        .map(|d| d.duration_seconds())
                        .unwrap_or(0.0);
                    if duration > 0.0 && shared.repeat_mode() != RepeatMode::LoopPoint {
                        resolved = resolved.clamp(0.0, duration);
                    } else if resolved < 0.0 {
                        resolved = 0.0;
                    }
                    shared.cached_duration_seconds.store(duration);
                    slot.resampler.reset();
                    shared.position_seconds.store(resolved);
                    slot.timeline.rebase(resolved);
                    shared.natural_end_pending.store(false, Ordering::Relaxed);
                    debug!(seek_target = request.target_seconds, resolved, "seek resolved");
                }
            }
        }

        if shared.stop_stream_after_seek.swap(false, Ordering::Relaxed) {
            let mut stream = shared.stream.lock().unwrap();
            shared.resume_after_rebuild.store(false, Ordering::Relaxed);
            if let Some(output) = stream.output.as_mut() {
                output.request_stop();
            }
        }

        {
            let seek = shared.seek.lock().unwrap();
            if seek.pending.is_none() {
                shared.seek_in_progress.store(false, Ordering::Relaxed);
                shared.seek_abort.store(false, Ordering::Relaxed);
            }
        }
        shared.notify_render();
    }

    debug!("seek worker stopped");
}
