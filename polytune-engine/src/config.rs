//! Pipeline configuration types and bootstrap configuration
//!
//! The pipeline config is the user-visible coarse tuning surface: which
//! output backend to prefer, how aggressive the latency/resilience trade-off
//! is, and which resampler strategy to use. The demo binary can additionally
//! load these from a TOML file with command-line overrides.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Output backend preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendPreference {
    /// Pick automatically: callback-pull, then buffer-queue, then blocking-write
    Auto,
    /// Callback-pull stream (the backend calls us with a frame budget)
    CallbackPull,
    /// Fixed buffer queue (we enqueue, the backend re-enters on completion)
    BufferQueue,
    /// Blocking write (we own a writer thread)
    BlockingWrite,
}

impl BackendPreference {
    /// Normalize a raw index; out-of-range values fall back to Auto.
    pub fn from_index(index: i32) -> Self {
        match index {
            1 => Self::CallbackPull,
            2 => Self::BufferQueue,
            3 => Self::BlockingWrite,
            _ => Self::Auto,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::CallbackPull => "callback-pull",
            Self::BufferQueue => "buffer-queue",
            Self::BlockingWrite => "blocking-write",
        }
    }
}

/// Stream performance mode preference.
///
/// Advisory: backends apply it where the platform exposes a matching knob and
/// record it for diagnostics otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PerformanceMode {
    Auto,
    LowLatency,
    None,
    PowerSaving,
}

impl PerformanceMode {
    /// Normalize a raw index; out-of-range values fall back to LowLatency.
    pub fn from_index(index: i32) -> Self {
        match index {
            0 => Self::Auto,
            2 => Self::None,
            3 => Self::PowerSaving,
            _ => Self::LowLatency,
        }
    }
}

/// Coarse latency/resilience trade-off for the render ring and device buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BufferPreset {
    VerySmall,
    Small,
    Medium,
    Large,
}

impl BufferPreset {
    /// Normalize a raw index; out-of-range values fall back to Small.
    pub fn from_index(index: i32) -> Self {
        match index {
            0 => Self::VerySmall,
            2 => Self::Medium,
            3 => Self::Large,
            _ => Self::Small,
        }
    }

    /// Render worker chunk size in frames.
    pub fn chunk_frames(self) -> usize {
        match self {
            Self::VerySmall => 256,
            Self::Small => 512,
            Self::Medium => 1024,
            Self::Large => 2048,
        }
    }

    /// Render ring high-watermark in frames. Always at least twice the chunk.
    pub fn target_frames(self) -> usize {
        let target = match self {
            Self::VerySmall => 2048,
            Self::Small => 4096,
            Self::Medium => 8192,
            Self::Large => 16384,
        };
        target.max(self.chunk_frames() * 2)
    }

    /// Device-side buffer size for queue and write backends.
    pub fn device_buffer_frames(self) -> usize {
        match self {
            Self::Small => 1024,
            Self::Large => 4096,
            Self::VerySmall | Self::Medium => 2048,
        }
    }

    /// Burst multiplier applied to callback-pull device buffers.
    pub fn burst_multiplier(self) -> usize {
        match self {
            Self::VerySmall | Self::Small => 2,
            Self::Medium => 4,
            Self::Large => 8,
        }
    }
}

/// Resampler strategy preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResamplerPreference {
    /// Built-in linear interpolator
    BuiltIn,
    /// High-quality polyphase path
    HighQuality,
}

impl ResamplerPreference {
    /// Normalize a raw index (1 = built-in, 2 = high-quality).
    pub fn from_index(index: i32) -> Self {
        if index == 2 {
            Self::HighQuality
        } else {
            Self::BuiltIn
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::BuiltIn => "built-in",
            Self::HighQuality => "high-quality",
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PipelineConfig {
    pub backend: BackendPreference,
    pub performance: PerformanceMode,
    pub buffer_preset: BufferPreset,
    pub resampler: ResamplerPreference,
    pub allow_fallback: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            performance: PerformanceMode::LowLatency,
            buffer_preset: BufferPreset::Small,
            resampler: ResamplerPreference::BuiltIn,
            allow_fallback: true,
        }
    }
}

impl PipelineConfig {
    /// Build a config from raw indices, normalizing out-of-range values.
    pub fn from_indices(
        backend: i32,
        performance: i32,
        buffer_preset: i32,
        resampler: i32,
        allow_fallback: bool,
    ) -> Self {
        Self {
            backend: BackendPreference::from_index(backend),
            performance: PerformanceMode::from_index(performance),
            buffer_preset: BufferPreset::from_index(buffer_preset),
            resampler: ResamplerPreference::from_index(resampler),
            allow_fallback,
        }
    }
}

/// Bootstrap configuration for the demo binary, loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Output device name (None = default device)
    pub device: Option<String>,

    /// Pipeline configuration
    pub pipeline: PipelineConfig,
}

impl BootstrapConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&text)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))
    }
}
