//! Recording session module
//!
//! The headless controller around the encode/mux pipeline:
//! - RecorderConfig and its video/audio sections
//! - RecordingSession to build, start and stop the encoders of one file
//! - Timestamped output naming

pub mod output;
pub mod session;
pub mod state;

pub use output::capture_file_path;
pub use session::{RecordingEvent, RecordingSession, SessionBackends};
pub use state::{
    AudioConfig, BitRate, RecorderConfig, RecordingState, RecordingSummary, TrackOutcome,
    VideoConfig,
};
