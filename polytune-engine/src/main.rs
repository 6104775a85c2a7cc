//! # polytune-engine demo player
//!
//! Plays the built-in tone source through the full pipeline (render worker,
//! DSP chain, ring, output backend) so the engine can be exercised without
//! any format decoder. Point it at a real source path once decoders are
//! registered by the embedding player.

use anyhow::Result;
use clap::Parser;
use polytune_engine::config::BootstrapConfig;
use polytune_engine::decoder::tone::ToneDecoder;
use polytune_engine::{DecoderRegistry, PlayerEngine};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "polytune-engine")]
#[command(about = "Playback engine demo - plays a synthesized tone through the full pipeline")]
#[command(version)]
struct Args {
    /// Path to configuration file (optional)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Tone frequency in Hz
    #[arg(short, long, default_value_t = 440.0)]
    frequency: f32,

    /// Playback duration in seconds
    #[arg(short, long, default_value_t = 5.0)]
    duration: f64,

    /// Master gain in dB
    #[arg(short, long, default_value_t = -6.0)]
    gain_db: f32,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "polytune_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let args = Args::parse();
    let bootstrap = match &args.config {
        Some(path) => BootstrapConfig::load(path)?,
        None => BootstrapConfig::default(),
    };
    info!(pipeline = ?bootstrap.pipeline, "starting demo player");

    let mut registry = DecoderRegistry::new();
    registry.register("tone", &["tone"], 10, || {
        Box::new(ToneDecoder::new(48_000, 600.0))
    });

    let engine = PlayerEngine::builder(Arc::new(registry))
        .device_name(bootstrap.device.clone())
        .pipeline_config(bootstrap.pipeline)
        .build();

    engine.set_master_gain_db(args.gain_db);
    engine.set_source(&PathBuf::from(format!("{}.tone", args.frequency)))?;
    engine.start()?;
    info!(
        backend = engine.audio_backend_label(),
        sample_rate = engine.stream_sample_rate(),
        title = engine.title(),
        "playing"
    );

    let steps = (args.duration / 0.5).ceil() as u64;
    for _ in 0..steps {
        std::thread::sleep(Duration::from_millis(500));
        info!(
            position = format!("{:.2}s", engine.position_seconds()),
            buffered = ?engine.ring_state(),
            "transport"
        );
    }

    engine.stop();
    let stats = engine.output_stats();
    info!(
        callbacks = stats.callbacks,
        underruns = stats.underruns,
        "demo finished"
    );
    Ok(())
}
