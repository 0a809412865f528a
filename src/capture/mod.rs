//! Audio capture sources
//!
//! The traits the audio encoder reads PCM through, plus the cpal-backed
//! microphone when the `microphone` feature is enabled.

pub mod traits;

#[cfg(feature = "microphone")]
pub mod microphone;

pub use traits::{
    input_buffer_size, open_first_available, AudioDeviceInfo, AudioInput, AudioInputConfig,
    AudioInputProvider, AudioSourceKind, RunningInput,
};

#[cfg(feature = "microphone")]
pub use microphone::{list_input_devices, CpalAudioProvider};
