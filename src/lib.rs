//! Capture Mux - hardware encode and MP4 mux pipeline.
//!
//! Audio samples and rendered video frames go through one encoder worker per
//! track; a shared container writer opens the output only once every track
//! reported its format and finalizes it when the last track stops.

pub mod backend;
pub mod capture;
pub mod codec;
pub mod encoder;
pub mod muxer;
pub mod recorder;
pub mod render;
pub mod utils;

pub use recorder::{RecorderConfig, RecordingEvent, RecordingSession, SessionBackends};
pub use utils::{RecorderError, RecorderResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber (`RUST_LOG`, default `capture_mux=debug`).
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "capture_mux=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
