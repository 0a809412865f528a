//! Audio track
//!
//! AAC encoder fed by a capture thread reading 16-bit PCM from an
//! [`AudioInputProvider`].

use super::signals::InputFeed;
use super::worker::{EncoderWorker, TrackProfile};
use crate::capture::{open_first_available, AudioInputConfig, AudioInputProvider, RunningInput};
use crate::codec::{MediaFormat, TrackKind};
use crate::muxer::RegisteredEncoder;
use crate::recorder::AudioConfig;
use crate::utils::error::RecorderResult;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub type AudioEncoder = EncoderWorker<AudioTrack>;

pub struct AudioTrack {
    config: AudioConfig,
    provider: Arc<dyn AudioInputProvider>,
    capture: Mutex<Option<JoinHandle<()>>>,
}

impl AudioTrack {
    pub fn new(config: AudioConfig, provider: Arc<dyn AudioInputProvider>) -> Self {
        Self {
            config,
            provider,
            capture: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }
}

impl TrackProfile for AudioTrack {
    const KIND: TrackKind = TrackKind::Audio;

    fn format(&self) -> MediaFormat {
        self.config.format()
    }

    fn register(worker: Arc<EncoderWorker<Self>>) -> RegisteredEncoder {
        RegisteredEncoder::Audio(worker)
    }

    fn on_start(&self, feed: InputFeed) {
        let mut capture = self.capture.lock();
        if capture.is_some() {
            return;
        }
        let provider = Arc::clone(&self.provider);
        let config = self.config.clone();
        match thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || capture_loop(feed, provider.as_ref(), &config))
        {
            Ok(handle) => *capture = Some(handle),
            Err(e) => tracing::error!("Failed to spawn audio capture thread: {}", e),
        }
    }

    fn signal_end_of_stream(&self, feed: &InputFeed) -> RecorderResult<()> {
        feed.encode(&[], feed.input_pts())
    }

    fn on_release(&self) {
        if let Some(handle) = self.capture.lock().take() {
            if handle.join().is_err() {
                tracing::error!("audio capture thread panicked");
            }
        }
    }
}

fn capture_loop(feed: InputFeed, provider: &dyn AudioInputProvider, config: &AudioConfig) {
    let input_config = AudioInputConfig {
        sample_rate: config.sample_rate,
        channels: config.channels,
        buffer_size: config.input_buffer_size(
            provider.min_buffer_size(config.sample_rate, config.channels),
        ),
    };

    let input = match open_first_available(provider, &input_config) {
        Ok((_, input)) => input,
        Err(e) => {
            tracing::error!("Failed to initialize audio input: {}", e);
            return;
        }
    };
    if !feed.is_capturing() {
        return;
    }
    let mut input = match RunningInput::start(input) {
        Ok(input) => input,
        Err(e) => {
            tracing::error!("Failed to start audio input: {}", e);
            return;
        }
    };

    tracing::info!("Audio capture started");
    let mut chunk = vec![0u8; config.samples_per_frame];
    let mut chunks = 0u64;
    while feed.should_capture() {
        match input.read(&mut chunk) {
            Ok(0) => {}
            Ok(n) => {
                if let Err(e) = feed.encode(&chunk[..n], feed.input_pts()) {
                    tracing::error!("Failed to queue audio input: {}", e);
                    break;
                }
                feed.frame_available_soon();
                chunks += 1;
            }
            Err(e) => {
                tracing::error!("Audio read failed: {}", e);
                break;
            }
        }
    }
    feed.frame_available_soon();
    tracing::info!("Audio capture finished after {} chunks", chunks);
}
