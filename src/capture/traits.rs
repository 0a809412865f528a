//! Capture trait definitions
//!
//! Platform-agnostic audio input sources.

use crate::utils::error::{RecorderError, RecorderResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical audio source, tried in [`AudioSourceKind::PRIORITY`] order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AudioSourceKind {
    Mic,
    Default,
    Camcorder,
    VoiceCommunication,
    VoiceRecognition,
}

impl AudioSourceKind {
    pub const PRIORITY: [AudioSourceKind; 5] = [
        AudioSourceKind::Mic,
        AudioSourceKind::Default,
        AudioSourceKind::Camcorder,
        AudioSourceKind::VoiceCommunication,
        AudioSourceKind::VoiceRecognition,
    ];
}

impl fmt::Display for AudioSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AudioSourceKind::Mic => "mic",
            AudioSourceKind::Default => "default",
            AudioSourceKind::Camcorder => "camcorder",
            AudioSourceKind::VoiceCommunication => "voice-communication",
            AudioSourceKind::VoiceRecognition => "voice-recognition",
        };
        f.write_str(name)
    }
}

/// PCM 16-bit input parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInputConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Internal buffer size in bytes
    pub buffer_size: usize,
}

/// Information about an audio device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDeviceInfo {
    /// Device name
    pub name: String,

    /// Whether this is the default device
    pub is_default: bool,
}

/// An opened PCM input
///
/// Created and driven on the capture thread, so it need not be `Send`.
pub trait AudioInput {
    fn start(&mut self) -> RecorderResult<()>;

    /// Blocking read of little-endian 16-bit PCM. Returns bytes read.
    fn read(&mut self, buf: &mut [u8]) -> RecorderResult<usize>;

    fn stop(&mut self);
}

/// Opens audio inputs by source
pub trait AudioInputProvider: Send + Sync {
    /// Smallest internal buffer the platform accepts, in bytes
    fn min_buffer_size(&self, sample_rate: u32, channels: u16) -> Option<usize>;

    fn open(
        &self,
        source: AudioSourceKind,
        config: &AudioInputConfig,
    ) -> RecorderResult<Box<dyn AudioInput>>;
}

/// Internal buffer size for an audio input.
///
/// `chunk * frames_per_buffer`, grown to the next chunk multiple (doubled)
/// when the platform minimum is larger.
pub fn input_buffer_size(chunk: usize, frames_per_buffer: usize, min_buffer_size: Option<usize>) -> usize {
    let size = chunk * frames_per_buffer;
    match min_buffer_size {
        Some(min) if size < min => ((min / chunk) + 1) * chunk * 2,
        _ => size,
    }
}

/// Open the first source in priority order that initializes.
pub fn open_first_available(
    provider: &dyn AudioInputProvider,
    config: &AudioInputConfig,
) -> RecorderResult<(AudioSourceKind, Box<dyn AudioInput>)> {
    for source in AudioSourceKind::PRIORITY {
        match provider.open(source, config) {
            Ok(input) => {
                tracing::info!("Audio input opened on {} source", source);
                return Ok((source, input));
            }
            Err(e) => tracing::debug!("Audio source {} unavailable: {}", source, e),
        }
    }
    Err(RecorderError::AudioInput("no audio source could be initialized".into()))
}

/// Stops the input when dropped
pub struct RunningInput(Box<dyn AudioInput>);

impl RunningInput {
    pub fn start(mut input: Box<dyn AudioInput>) -> RecorderResult<Self> {
        input.start()?;
        Ok(Self(input))
    }

    pub fn read(&mut self, buf: &mut [u8]) -> RecorderResult<usize> {
        self.0.read(buf)
    }
}

impl Drop for RunningInput {
    fn drop(&mut self) {
        self.0.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_input_buffer_size_default() {
        assert_eq!(input_buffer_size(1024, 25, Some(3584)), 25_600);
    }

    #[test]
    fn test_input_buffer_size_grows_to_minimum() {
        assert_eq!(input_buffer_size(1024, 25, Some(30_000)), 61_440);
        assert_eq!(input_buffer_size(1024, 25, None), 25_600);
    }

    struct FlakyProvider {
        working: AudioSourceKind,
        attempts: Mutex<Vec<AudioSourceKind>>,
        stops: Arc<Mutex<u32>>,
    }

    struct NullInput(Arc<Mutex<u32>>);

    impl AudioInput for NullInput {
        fn start(&mut self) -> RecorderResult<()> {
            Ok(())
        }

        fn read(&mut self, _buf: &mut [u8]) -> RecorderResult<usize> {
            Ok(0)
        }

        fn stop(&mut self) {
            *self.0.lock() += 1;
        }
    }

    impl AudioInputProvider for FlakyProvider {
        fn min_buffer_size(&self, _sample_rate: u32, _channels: u16) -> Option<usize> {
            None
        }

        fn open(
            &self,
            source: AudioSourceKind,
            _config: &AudioInputConfig,
        ) -> RecorderResult<Box<dyn AudioInput>> {
            self.attempts.lock().push(source);
            if source == self.working {
                Ok(Box::new(NullInput(self.stops.clone())))
            } else {
                Err(RecorderError::AudioInput("busy".into()))
            }
        }
    }

    fn config() -> AudioInputConfig {
        AudioInputConfig {
            sample_rate: 44_100,
            channels: 1,
            buffer_size: 25_600,
        }
    }

    #[test]
    fn test_sources_tried_in_priority_order() {
        let provider = FlakyProvider {
            working: AudioSourceKind::Camcorder,
            attempts: Mutex::new(Vec::new()),
            stops: Arc::new(Mutex::new(0)),
        };
        let (source, _input) = open_first_available(&provider, &config()).unwrap();
        assert_eq!(source, AudioSourceKind::Camcorder);
        assert_eq!(
            provider.attempts.lock().as_slice(),
            &[AudioSourceKind::Mic, AudioSourceKind::Default, AudioSourceKind::Camcorder]
        );
    }

    #[test]
    fn test_running_input_stops_on_drop() {
        let stops = Arc::new(Mutex::new(0));
        let provider = FlakyProvider {
            working: AudioSourceKind::Mic,
            attempts: Mutex::new(Vec::new()),
            stops: stops.clone(),
        };
        let (_, input) = open_first_available(&provider, &config()).unwrap();
        drop(RunningInput::start(input).unwrap());
        assert_eq!(*stops.lock(), 1);
    }
}
