//! Demo recorder
//!
//! Records one session against the software backends (or the default
//! microphone with the `microphone` feature) and prints its summary as JSON.
//!
//! Usage: `capture-mux [config.json]`

use anyhow::{bail, Context, Result};
use capture_mux::backend::{MemoryContainerFactory, SyntheticCodecFactory, TestPatternRenderer};
use capture_mux::capture::AudioInputProvider;
use capture_mux::recorder::{RecordingEvent, RecordingSession, SessionBackends};
use capture_mux::render::FrameRenderer;
use capture_mux::RecorderConfig;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn audio_input() -> Arc<dyn AudioInputProvider> {
    #[cfg(feature = "microphone")]
    {
        for device in capture_mux::capture::list_input_devices() {
            tracing::info!("Input device: {} (default: {})", device.name, device.is_default);
        }
        Arc::new(capture_mux::capture::CpalAudioProvider::new())
    }

    #[cfg(not(feature = "microphone"))]
    {
        Arc::new(capture_mux::backend::ToneAudioProvider::default())
    }
}

fn main() -> Result<()> {
    capture_mux::init_tracing();
    tracing::info!("Starting capture-mux v{}", env!("CARGO_PKG_VERSION"));

    let config = match std::env::args().nth(1) {
        Some(path) => RecorderConfig::load(Path::new(&path))
            .with_context(|| format!("failed to load config from {}", path))?,
        None => RecorderConfig::default(),
    };

    let containers = Arc::new(MemoryContainerFactory::new());
    let renderer = config
        .video
        .as_ref()
        .map(|video| Box::new(TestPatternRenderer::new(video.width, video.height)) as Box<dyn FrameRenderer>);
    let backends = SessionBackends {
        containers: containers.clone(),
        codecs: Arc::new(SyntheticCodecFactory::new()),
        audio_input: Some(audio_input()),
        renderer,
    };

    let session = RecordingSession::new(&config, backends).context("failed to create session")?;
    let mut events = session.subscribe();
    session.start().context("failed to start recording")?;

    let frame_rate = config.video.as_ref().map(|v| v.frame_rate).unwrap_or(25).max(1);
    let frame_interval = Duration::from_secs_f64(1.0 / frame_rate as f64);
    let deadline = Instant::now() + Duration::from_secs_f64(config.demo_seconds.max(0.0));
    let mut frames = 0u64;
    while Instant::now() < deadline {
        if session.frame_available(None) {
            frames += 1;
        }
        thread::sleep(frame_interval);
    }
    tracing::info!("Signalled {} frames", frames);

    session.stop()?;
    if !session.wait_finished(Duration::from_secs(10)) {
        bail!("encoders did not finish within 10s");
    }

    while let Ok(event) = events.try_recv() {
        if let RecordingEvent::Error(message) = event {
            tracing::error!("Encoder error: {}", message);
        }
    }

    let summary = session.summary();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if let Some(probe) = containers.last_probe() {
        tracing::info!(
            "Container {:?}: {} tracks, finalized: {}",
            probe.path(),
            probe.track_count(),
            probe.is_finalized()
        );
    }
    Ok(())
}
