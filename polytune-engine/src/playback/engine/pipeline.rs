//! Pipeline configuration

use crate::config::{PipelineConfig, ResamplerPreference};
use crate::playback::engine::stream::reconfigure_stream;
use crate::playback::engine::PlayerEngine;
use std::sync::atomic::Ordering;
use tracing::info;

impl PlayerEngine {
    /// Apply a pipeline configuration. Unchanged configs are a no-op; a
    /// changed config rebuilds the stream while preserving playback.
    pub fn set_audio_pipeline_config(&self, config: PipelineConfig) {
        let shared = &self.shared;
        let changed = {
            let mut stream = shared.stream.lock().unwrap();
            let changed = stream.params.config != config;
            stream.params.config = config;
            changed
        };

        shared.resampler_preference.store(
            match config.resampler {
                ResamplerPreference::BuiltIn => 1,
                ResamplerPreference::HighQuality => 2,
            },
            Ordering::Relaxed,
        );
        // A new config may make the high-quality engine viable again.
        shared
            .decoder
            .lock()
            .unwrap()
            .resampler
            .clear_unavailable_latch();
        shared.update_ring_tuning(config.buffer_preset);

        info!(
            backend = config.backend.label(),
            performance = ?config.performance,
            buffer_preset = ?config.buffer_preset,
            resampler = config.resampler.label(),
            allow_fallback = config.allow_fallback,
            changed,
            "audio pipeline config"
        );

        if !changed {
            return;
        }
        reconfigure_stream(&self.shared, true);
    }

    pub fn audio_pipeline_config(&self) -> PipelineConfig {
        self.shared.stream.lock().unwrap().params.config
    }

    /// Apply a pipeline configuration given as raw indices (host bridges).
    pub fn set_audio_pipeline_config_indices(
        &self,
        backend: i32,
        performance: i32,
        buffer_preset: i32,
        resampler: i32,
        allow_fallback: bool,
    ) {
        self.set_audio_pipeline_config(PipelineConfig::from_indices(
            backend,
            performance,
            buffer_preset,
            resampler,
            allow_fallback,
        ));
    }
}
