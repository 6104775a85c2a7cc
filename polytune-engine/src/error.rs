//! Error types for the playback engine

use thiserror::Error;

/// Main error type for the playback engine
#[derive(Debug, Error)]
pub enum Error {
    /// IO errors from file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No registered decoder matched the source path
    #[error("no decoder available for source: {path}")]
    NoDecoder { path: String },

    /// A decoder was created but refused to open the source
    #[error("failed to open source: {path} (decoder: {decoder})")]
    SourceOpen { path: String, decoder: String },

    /// No audio backend could be configured
    #[error("no audio backend could be opened (preference {preference}, fallback allowed: {allow_fallback})")]
    StreamOpen {
        preference: &'static str,
        allow_fallback: bool,
    },

    /// Backend-specific failure while configuring or starting a stream
    #[error("audio backend error: {0}")]
    Backend(String),

    /// The stream refused to start even after a rebuild
    #[error("audio stream failed to start")]
    StreamStart,

    /// High-quality resampler could not be constructed
    #[error("resampler initialization failed ({source_rate} Hz -> {target_rate} Hz): {message}")]
    ResamplerInit {
        source_rate: u32,
        target_rate: u32,
        message: String,
    },

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias using our error type
pub type Result<T> = std::result::Result<T, Error>;
