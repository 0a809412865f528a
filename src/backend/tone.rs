//! Sine tone audio input
//!
//! Generates 16-bit PCM paced at the configured sample rate, so reads block
//! like a real microphone.

use crate::capture::{AudioInput, AudioInputConfig, AudioInputProvider, AudioSourceKind};
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::Mutex;
use std::f32::consts::TAU;
use std::thread;
use std::time::{Duration, Instant};

/// [`AudioInputProvider`] producing a sine tone
pub struct ToneAudioProvider {
    frequency: f32,
    unavailable: Vec<AudioSourceKind>,
    attempts: Mutex<Vec<AudioSourceKind>>,
}

impl Default for ToneAudioProvider {
    fn default() -> Self {
        Self::new(440.0)
    }
}

impl ToneAudioProvider {
    pub fn new(frequency: f32) -> Self {
        Self {
            frequency,
            unavailable: Vec::new(),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Make `sources` fail to initialize.
    pub fn with_unavailable(mut self, sources: &[AudioSourceKind]) -> Self {
        self.unavailable = sources.to_vec();
        self
    }

    /// Sources `open` was called with, in order
    pub fn attempts(&self) -> Vec<AudioSourceKind> {
        self.attempts.lock().clone()
    }
}

impl AudioInputProvider for ToneAudioProvider {
    fn min_buffer_size(&self, sample_rate: u32, channels: u16) -> Option<usize> {
        Some(sample_rate as usize * channels as usize * 2 / 25)
    }

    fn open(
        &self,
        source: AudioSourceKind,
        config: &AudioInputConfig,
    ) -> RecorderResult<Box<dyn AudioInput>> {
        self.attempts.lock().push(source);
        if self.unavailable.contains(&source) {
            return Err(RecorderError::AudioInput(format!("{} source failed to initialize", source)));
        }
        Ok(Box::new(ToneInput {
            frequency: self.frequency,
            sample_rate: config.sample_rate,
            channels: config.channels.max(1),
            started: None,
            frames_emitted: 0,
        }))
    }
}

struct ToneInput {
    frequency: f32,
    sample_rate: u32,
    channels: u16,
    started: Option<Instant>,
    frames_emitted: u64,
}

impl AudioInput for ToneInput {
    fn start(&mut self) -> RecorderResult<()> {
        self.started = Some(Instant::now());
        self.frames_emitted = 0;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> RecorderResult<usize> {
        let Some(started) = self.started else {
            return Err(RecorderError::AudioInput("input not started".into()));
        };
        let frame_bytes = self.channels as usize * 2;
        let frames = buf.len() / frame_bytes;
        for (i, frame) in buf.chunks_exact_mut(frame_bytes).take(frames).enumerate() {
            let t = (self.frames_emitted + i as u64) as f32 / self.sample_rate as f32;
            let sample = ((TAU * self.frequency * t).sin() * i16::MAX as f32 * 0.5) as i16;
            for channel in frame.chunks_exact_mut(2) {
                channel.copy_from_slice(&sample.to_le_bytes());
            }
        }
        self.frames_emitted += frames as u64;

        // Block until this audio would have been captured
        let due = Duration::from_secs_f64(self.frames_emitted as f64 / self.sample_rate as f64);
        if let Some(wait) = due.checked_sub(started.elapsed()) {
            thread::sleep(wait);
        }
        Ok(frames * frame_bytes)
    }

    fn stop(&mut self) {
        self.started = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AudioInputConfig {
        AudioInputConfig {
            sample_rate: 44_100,
            channels: 1,
            buffer_size: 25_600,
        }
    }

    #[test]
    fn test_read_is_paced() {
        let provider = ToneAudioProvider::default();
        let mut input = provider.open(AudioSourceKind::Mic, &config()).unwrap();
        input.start().unwrap();
        let mut buf = vec![0u8; 4410 * 2];
        let begin = Instant::now();
        assert_eq!(input.read(&mut buf).unwrap(), 8820);
        assert!(begin.elapsed() >= Duration::from_millis(90));
        assert!(buf.iter().any(|&b| b != 0));
    }

    #[test]
    fn test_unavailable_source() {
        let provider = ToneAudioProvider::default().with_unavailable(&[AudioSourceKind::Mic]);
        assert!(provider.open(AudioSourceKind::Mic, &config()).is_err());
        assert!(provider.open(AudioSourceKind::Default, &config()).is_ok());
        assert_eq!(provider.attempts(), vec![AudioSourceKind::Mic, AudioSourceKind::Default]);
    }

    #[test]
    fn test_read_before_start_fails() {
        let provider = ToneAudioProvider::default();
        let mut input = provider.open(AudioSourceKind::Mic, &config()).unwrap();
        assert!(input.read(&mut [0u8; 64]).is_err());
    }
}
