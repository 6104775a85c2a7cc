//! Engine facade
//!
//! `PlayerEngine` owns the decoder slot, the render ring, the output stream
//! and the two background workers, and exposes the host-facing control
//! surface. Workers are joined on drop: signal stop, join the seek worker,
//! join the render worker, close the stream, destroy the decoder.

pub mod core;
mod dsp;
mod options;
mod pipeline;
mod stream;
mod transport;

use crate::audio::output::{DeviceHooks, StreamParams};
use crate::audio::queue_backend::QueueDeviceFactory;
use crate::audio::write_backend::WriteDeviceFactory;
use crate::config::PipelineConfig;
use crate::decoder::registry::DecoderRegistry;
use crate::playback::engine::core::{EngineShared, EngineState, OutputStats};
use crate::playback::render::render_worker_loop;
use crate::playback::ring_buffer::RingState;
use crate::playback::seek::seek_worker_loop;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::info;

pub struct PlayerEngine {
    pub(crate) shared: Arc<EngineShared>,
    render_worker: Option<JoinHandle<()>>,
    seek_worker: Option<JoinHandle<()>>,
}

/// Builder so hosts can install device hooks and defaults before the workers
/// spin up.
pub struct PlayerEngineBuilder {
    registry: Arc<DecoderRegistry>,
    hooks: DeviceHooks,
    device_name: Option<String>,
    config: PipelineConfig,
}

impl PlayerEngineBuilder {
    pub fn new(registry: Arc<DecoderRegistry>) -> Self {
        Self {
            registry,
            hooks: DeviceHooks::default(),
            device_name: None,
            config: PipelineConfig::default(),
        }
    }

    /// Output device name for the callback-pull backend (None = default).
    pub fn device_name(mut self, name: Option<String>) -> Self {
        self.device_name = name;
        self
    }

    pub fn pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Platform device for the buffer-queue shape.
    pub fn queue_device_factory(mut self, factory: Arc<dyn QueueDeviceFactory>) -> Self {
        self.hooks.queue_factory = Some(factory);
        self
    }

    /// Platform device for the blocking-write shape.
    pub fn write_device_factory(mut self, factory: Arc<dyn WriteDeviceFactory>) -> Self {
        self.hooks.write_factory = Some(factory);
        self
    }

    pub fn build(self) -> PlayerEngine {
        let params = StreamParams {
            device_name: self.device_name,
            config: self.config,
            sample_rate_hint: 0,
        };
        let shared = Arc::new(EngineShared::new(self.registry, self.hooks, params));

        let render_shared = Arc::clone(&shared);
        let render_worker = std::thread::Builder::new()
            .name("pt_render".into())
            .spawn(move || render_worker_loop(render_shared))
            .expect("failed to spawn render worker");

        let seek_shared = Arc::clone(&shared);
        let seek_worker = std::thread::Builder::new()
            .name("pt_seek".into())
            .spawn(move || seek_worker_loop(seek_shared))
            .expect("failed to spawn seek worker");

        info!("playback engine created");
        PlayerEngine {
            shared,
            render_worker: Some(render_worker),
            seek_worker: Some(seek_worker),
        }
    }
}

impl PlayerEngine {
    pub fn builder(registry: Arc<DecoderRegistry>) -> PlayerEngineBuilder {
        PlayerEngineBuilder::new(registry)
    }

    /// Engine with default configuration and no queue/write devices.
    pub fn new(registry: Arc<DecoderRegistry>) -> Self {
        Self::builder(registry).build()
    }

    /// Coarse engine state for diagnostics.
    pub fn engine_state(&self) -> EngineState {
        self.shared.engine_state()
    }

    /// Coarse render ring state for diagnostics.
    pub fn ring_state(&self) -> RingState {
        self.shared.ring_state()
    }

    pub fn output_stats(&self) -> OutputStats {
        OutputStats {
            callbacks: self.shared.callback_count.load(Ordering::Relaxed),
            underruns: self.shared.underrun_count.load(Ordering::Relaxed),
            underrun_frames: self.shared.underrun_frames.load(Ordering::Relaxed),
        }
    }

    /// Label of the backend currently carrying audio.
    pub fn audio_backend_label(&self) -> String {
        if !self.is_playing() {
            return "(inactive)".to_string();
        }
        self.shared
            .stream
            .lock()
            .unwrap()
            .output
            .as_ref()
            .map(|output| output.kind().label().to_string())
            .unwrap_or_else(|| "(inactive)".to_string())
    }

    pub fn stream_sample_rate(&self) -> u32 {
        self.shared.stream_sample_rate.load(Ordering::Relaxed)
    }

    // Metadata pass-through. None of this is engine logic; the decoder owns
    // the answers.

    pub fn title(&self) -> String {
        let mut slot = self.shared.decoder.lock().unwrap();
        slot.decoder
            .as_deref_mut()
            .map(|decoder| decoder.title())
            .unwrap_or_default()
    }

    pub fn artist(&self) -> String {
        let mut slot = self.shared.decoder.lock().unwrap();
        slot.decoder
            .as_deref_mut()
            .map(|decoder| decoder.artist())
            .unwrap_or_default()
    }

    pub fn current_decoder_name(&self) -> Option<String> {
        let slot = self.shared.decoder.lock().unwrap();
        slot.decoder.as_deref().map(|decoder| decoder.name().to_string())
    }

    pub fn source_sample_rate(&self) -> u32 {
        let mut slot = self.shared.decoder.lock().unwrap();
        slot.decoder
            .as_deref_mut()
            .map(|decoder| decoder.sample_rate())
            .unwrap_or(0)
    }

    pub fn source_channel_count(&self) -> usize {
        let mut slot = self.shared.decoder.lock().unwrap();
        slot.decoder
            .as_deref_mut()
            .map(|decoder| decoder.channel_count())
            .unwrap_or(0)
    }

    pub fn display_channel_count(&self) -> usize {
        let mut slot = self.shared.decoder.lock().unwrap();
        slot.decoder
            .as_deref_mut()
            .map(|decoder| decoder.display_channel_count())
            .unwrap_or(0)
    }

    pub fn bit_depth(&self) -> u32 {
        let mut slot = self.shared.decoder.lock().unwrap();
        slot.decoder
            .as_deref_mut()
            .map(|decoder| decoder.bit_depth())
            .unwrap_or(0)
    }

    pub fn bit_depth_label(&self) -> String {
        let mut slot = self.shared.decoder.lock().unwrap();
        slot.decoder
            .as_deref_mut()
            .map(|decoder| decoder.bit_depth_label())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    // Visualization taps (read-only).

    pub fn visualization_waveform(&self, channel_index: usize) -> Vec<f32> {
        self.shared.visualization.waveform(channel_index)
    }

    pub fn visualization_vu_levels(&self) -> [f32; 2] {
        self.shared.visualization.vu_levels()
    }

    pub fn visualization_bars(&self) -> Vec<f32> {
        self.shared.visualization.bars()
    }

    pub fn visualization_scope(&self, channel_index: usize, window_ms: u32) -> Vec<f32> {
        self.shared.visualization.waveform_scope(
            channel_index,
            window_ms,
            self.stream_sample_rate(),
        )
    }

    pub fn visualization_channel_count(&self) -> usize {
        self.shared.visualization.channel_count()
    }
}

impl Drop for PlayerEngine {
    fn drop(&mut self) {
        // Signal stop to both workers.
        {
            let mut ring = self.shared.ring.lock().unwrap();
            ring.stop = true;
        }
        self.shared.notify_render_all();
        {
            let mut seek = self.shared.seek.lock().unwrap();
            seek.stop = true;
        }
        self.shared.seek_abort.store(true, Ordering::Relaxed);
        self.shared.seek_cv.notify_all();

        // Join seek first (it may be waiting on the decoder lock), then the
        // render worker.
        if let Some(handle) = self.seek_worker.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.render_worker.take() {
            let _ = handle.join();
        }

        // Close the stream before destroying the decoder.
        {
            let mut stream = self.shared.stream.lock().unwrap();
            if let Some(output) = stream.output.as_mut() {
                output.request_stop();
            }
            stream.output = None;
        }
        {
            let mut slot = self.shared.decoder.lock().unwrap();
            slot.decoder = None;
        }
        info!("playback engine shut down");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A bare `EngineShared` with no workers or stream, for unit tests that
    /// exercise shared-state logic directly.
    pub(crate) fn bare_shared() -> Arc<EngineShared> {
        Arc::new(EngineShared::new(
            Arc::new(DecoderRegistry::new()),
            DeviceHooks::default(),
            StreamParams::default(),
        ))
    }
}
