//! Software encoder
//!
//! Follows the hardware codec state machine closely enough to drive the
//! pipeline without devices: the output format is announced after the first
//! input, a codec-config buffer precedes the first sample, every input yields
//! one output, and end-of-input yields an empty end-of-stream buffer.

use crate::codec::{
    BufferFlags, BufferInfo, EncoderFactory, HardwareEncoder, InputStatus, InputSurface,
    MediaFormat, OutputStatus, MIME_AUDIO_AAC, MIME_VIDEO_AVC,
};
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fault injection switches
#[derive(Debug, Clone)]
pub struct SyntheticOptions {
    /// `configure` fails
    pub fail_configure: bool,
    /// Output queue never yields anything
    pub stall_output: bool,
    /// Announce the output format twice
    pub repeat_format_change: bool,
    /// Dequeued output buffers have no payload
    pub lose_output_buffers: bool,
    /// Input buffer slots handed out round-robin
    pub input_slots: usize,
    /// Output bytes per input byte, in percent
    pub compression_percent: usize,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        Self {
            fail_configure: false,
            stall_output: false,
            repeat_format_change: false,
            lose_output_buffers: false,
            input_slots: 8,
            compression_percent: 10,
        }
    }
}

enum PendingOutput {
    FormatChanged,
    Buffer { data: Vec<u8>, info: BufferInfo },
}

#[derive(Default)]
struct CodecState {
    format: Option<MediaFormat>,
    started: bool,
    released: bool,
    surface_created: bool,
    format_announced: bool,
    config_emitted: bool,
    input_ended: bool,
    next_input: usize,
    next_output: usize,
    frames: u64,
    pending: VecDeque<PendingOutput>,
    dequeued: HashMap<usize, Vec<u8>>,
}

struct CodecInner {
    options: SyntheticOptions,
    state: Mutex<CodecState>,
    output_ready: Condvar,
    output_polls: AtomicU64,
    inputs_accepted: AtomicU64,
}

impl CodecInner {
    fn codec_config(format: &MediaFormat) -> Vec<u8> {
        match format {
            // SPS + PPS
            MediaFormat::Video(_) => vec![0, 0, 0, 1, 0x67, 0x42, 0x80, 0x1f, 0, 0, 0, 1, 0x68, 0xce, 0x06, 0xe2],
            // AudioSpecificConfig, AAC-LC 44.1 kHz mono
            MediaFormat::Audio(_) => vec![0x12, 0x08],
        }
    }

    fn key_frame_interval(format: &MediaFormat) -> u64 {
        match format {
            MediaFormat::Video(video) => (video.frame_rate as u64 * video.i_frame_interval as u64).max(1),
            MediaFormat::Audio(_) => 1,
        }
    }

    fn compress(&self, data: &[u8]) -> Vec<u8> {
        let size = (data.len() * self.options.compression_percent / 100).max(1);
        let stride = (data.len() / size).max(1);
        data.iter().step_by(stride).take(size).copied().collect()
    }

    /// Turn one input into pending output
    fn accept_input(&self, data: &[u8], presentation_time_us: i64, flags: BufferFlags) -> RecorderResult<()> {
        let mut state = self.state.lock();
        if !state.started {
            return Err(RecorderError::Codec("encoder not started".into()));
        }
        if state.input_ended {
            return Ok(());
        }
        let format = state
            .format
            .clone()
            .ok_or_else(|| RecorderError::Codec("encoder not configured".into()))?;

        if !state.format_announced {
            state.format_announced = true;
            state.pending.push_back(PendingOutput::FormatChanged);
            if self.options.repeat_format_change {
                state.pending.push_back(PendingOutput::FormatChanged);
            }
        }
        if !state.config_emitted {
            state.config_emitted = true;
            let config = Self::codec_config(&format);
            state.pending.push_back(PendingOutput::Buffer {
                info: BufferInfo {
                    offset: 0,
                    size: config.len(),
                    presentation_time_us: 0,
                    flags: BufferFlags {
                        codec_config: true,
                        ..BufferFlags::NONE
                    },
                },
                data: config,
            });
        }
        if !data.is_empty() {
            let payload = self.compress(data);
            let key_frame = state.frames % Self::key_frame_interval(&format) == 0;
            state.frames += 1;
            state.pending.push_back(PendingOutput::Buffer {
                info: BufferInfo {
                    offset: 0,
                    size: payload.len(),
                    presentation_time_us,
                    flags: BufferFlags {
                        key_frame,
                        ..BufferFlags::NONE
                    },
                },
                data: payload,
            });
            self.inputs_accepted.fetch_add(1, Ordering::Relaxed);
        }
        if flags.end_of_stream {
            state.input_ended = true;
            state.pending.push_back(PendingOutput::Buffer {
                data: Vec::new(),
                info: BufferInfo {
                    offset: 0,
                    size: 0,
                    presentation_time_us,
                    flags: BufferFlags::END_OF_STREAM,
                },
            });
        }
        self.output_ready.notify_all();
        Ok(())
    }
}

/// Software implementation of [`HardwareEncoder`]
pub struct SyntheticEncoder {
    inner: Arc<CodecInner>,
}

impl SyntheticEncoder {
    pub fn new(options: SyntheticOptions) -> Self {
        Self {
            inner: Arc::new(CodecInner {
                options,
                state: Mutex::new(CodecState::default()),
                output_ready: Condvar::new(),
                output_polls: AtomicU64::new(0),
                inputs_accepted: AtomicU64::new(0),
            }),
        }
    }

    /// Number of `dequeue_output_buffer` calls so far
    pub fn output_polls(&self) -> u64 {
        self.inner.output_polls.load(Ordering::Relaxed)
    }

    /// Non-empty inputs turned into samples
    pub fn inputs_accepted(&self) -> u64 {
        self.inner.inputs_accepted.load(Ordering::Relaxed)
    }

    pub fn is_released(&self) -> bool {
        self.inner.state.lock().released
    }
}

impl HardwareEncoder for SyntheticEncoder {
    fn configure(&self, format: &MediaFormat) -> RecorderResult<()> {
        if self.inner.options.fail_configure {
            return Err(RecorderError::Codec(format!("failed to configure {}", format.mime())));
        }
        let mut state = self.inner.state.lock();
        if state.started {
            return Err(RecorderError::Codec("configure after start".into()));
        }
        state.format = Some(format.clone());
        Ok(())
    }

    fn create_input_surface(&self) -> RecorderResult<Arc<dyn InputSurface>> {
        let mut state = self.inner.state.lock();
        match state.format {
            Some(MediaFormat::Video(_)) if !state.started => {
                state.surface_created = true;
                Ok(Arc::new(SyntheticSurface {
                    codec: Arc::clone(&self.inner),
                }))
            }
            Some(MediaFormat::Video(_)) => {
                Err(RecorderError::Codec("input surface requested after start".into()))
            }
            _ => Err(RecorderError::Codec("input surface requires a configured video encoder".into())),
        }
    }

    fn start(&self) -> RecorderResult<()> {
        let mut state = self.inner.state.lock();
        if state.format.is_none() {
            return Err(RecorderError::Codec("start before configure".into()));
        }
        state.started = true;
        Ok(())
    }

    fn dequeue_input_buffer(&self, timeout: Duration) -> InputStatus {
        let mut state = self.inner.state.lock();
        if !state.started || state.input_ended || state.surface_created {
            self.inner.output_ready.wait_for(&mut state, timeout);
            return InputStatus::TryAgainLater;
        }
        let index = state.next_input % self.inner.options.input_slots.max(1);
        state.next_input += 1;
        InputStatus::Buffer(index)
    }

    fn queue_input_buffer(
        &self,
        _index: usize,
        data: &[u8],
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> RecorderResult<()> {
        self.inner.accept_input(data, presentation_time_us, flags)
    }

    fn dequeue_output_buffer(&self, timeout: Duration) -> OutputStatus {
        self.inner.output_polls.fetch_add(1, Ordering::Relaxed);
        let mut state = self.inner.state.lock();
        if self.inner.options.stall_output || !state.started {
            self.inner.output_ready.wait_for(&mut state, timeout);
            return OutputStatus::TryAgainLater;
        }
        if state.pending.is_empty() {
            self.inner.output_ready.wait_for(&mut state, timeout);
        }
        match state.pending.pop_front() {
            None => OutputStatus::TryAgainLater,
            Some(PendingOutput::FormatChanged) => OutputStatus::FormatChanged,
            Some(PendingOutput::Buffer { data, info }) => {
                let index = state.next_output;
                state.next_output += 1;
                if !self.inner.options.lose_output_buffers {
                    state.dequeued.insert(index, data);
                }
                OutputStatus::Buffer { index, info }
            }
        }
    }

    fn output_buffer(&self, index: usize) -> Option<Vec<u8>> {
        self.inner.state.lock().dequeued.get(&index).cloned()
    }

    fn output_format(&self) -> RecorderResult<MediaFormat> {
        self.inner
            .state
            .lock()
            .format
            .clone()
            .ok_or_else(|| RecorderError::Codec("encoder not configured".into()))
    }

    fn release_output_buffer(&self, index: usize) {
        self.inner.state.lock().dequeued.remove(&index);
    }

    fn signal_end_of_input_stream(&self) -> RecorderResult<()> {
        self.inner.accept_input(&[], 0, BufferFlags::END_OF_STREAM)
    }

    fn stop(&self) -> RecorderResult<()> {
        let mut state = self.inner.state.lock();
        state.started = false;
        self.inner.output_ready.notify_all();
        Ok(())
    }

    fn release(&self) {
        let mut state = self.inner.state.lock();
        state.started = false;
        state.released = true;
        state.pending.clear();
        state.dequeued.clear();
        self.inner.output_ready.notify_all();
    }
}

struct SyntheticSurface {
    codec: Arc<CodecInner>,
}

impl InputSurface for SyntheticSurface {
    fn submit_frame(&self, pixels: &[u8], presentation_time_us: i64) -> RecorderResult<()> {
        if pixels.is_empty() {
            return Err(RecorderError::Render("empty frame".into()));
        }
        self.codec.accept_input(pixels, presentation_time_us, BufferFlags::NONE)
    }

    fn release(&self) {}
}

/// Creates [`SyntheticEncoder`]s for AVC and AAC
#[derive(Default)]
pub struct SyntheticCodecFactory {
    video_options: SyntheticOptions,
    audio_options: SyntheticOptions,
    created: Mutex<Vec<(String, Arc<SyntheticEncoder>)>>,
}

impl SyntheticCodecFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_video_options(mut self, options: SyntheticOptions) -> Self {
        self.video_options = options;
        self
    }

    pub fn with_audio_options(mut self, options: SyntheticOptions) -> Self {
        self.audio_options = options;
        self
    }

    /// Most recent encoder created for `mime`
    pub fn encoder(&self, mime: &str) -> Option<Arc<SyntheticEncoder>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|(m, _)| m == mime)
            .map(|(_, encoder)| Arc::clone(encoder))
    }
}

impl EncoderFactory for SyntheticCodecFactory {
    fn create_encoder(&self, mime: &str) -> RecorderResult<Arc<dyn HardwareEncoder>> {
        let options = match mime {
            MIME_VIDEO_AVC => self.video_options.clone(),
            MIME_AUDIO_AAC => self.audio_options.clone(),
            other => return Err(RecorderError::Codec(format!("no encoder for {}", other))),
        };
        let encoder = Arc::new(SyntheticEncoder::new(options));
        self.created.lock().push((mime.to_string(), Arc::clone(&encoder)));
        Ok(encoder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AacProfile, AudioFormat};

    fn audio_format() -> MediaFormat {
        MediaFormat::Audio(AudioFormat {
            mime: MIME_AUDIO_AAC.to_string(),
            sample_rate: 44_100,
            channels: 1,
            bit_rate: 64_000,
            profile: AacProfile::Lc,
        })
    }

    #[test]
    fn test_output_sequence() {
        let encoder = SyntheticEncoder::new(SyntheticOptions::default());
        encoder.configure(&audio_format()).unwrap();
        encoder.start().unwrap();
        let InputStatus::Buffer(index) = encoder.dequeue_input_buffer(Duration::ZERO) else {
            panic!("no input buffer");
        };
        encoder
            .queue_input_buffer(index, &[9; 1024], 1_000, BufferFlags::END_OF_STREAM)
            .unwrap();

        let timeout = Duration::from_millis(1);
        assert_eq!(encoder.dequeue_output_buffer(timeout), OutputStatus::FormatChanged);
        let OutputStatus::Buffer { info, .. } = encoder.dequeue_output_buffer(timeout) else {
            panic!("expected codec config");
        };
        assert!(info.flags.codec_config);
        let OutputStatus::Buffer { index, info } = encoder.dequeue_output_buffer(timeout) else {
            panic!("expected sample");
        };
        assert_eq!(info.size, 102);
        assert_eq!(encoder.output_buffer(index).map(|b| b.len()), Some(102));
        let OutputStatus::Buffer { info, .. } = encoder.dequeue_output_buffer(timeout) else {
            panic!("expected end of stream");
        };
        assert!(info.flags.end_of_stream);
        assert_eq!(encoder.dequeue_output_buffer(timeout), OutputStatus::TryAgainLater);
    }

    #[test]
    fn test_input_surface_requires_video() {
        let encoder = SyntheticEncoder::new(SyntheticOptions::default());
        encoder.configure(&audio_format()).unwrap();
        assert!(encoder.create_input_surface().is_err());
    }

    #[test]
    fn test_configure_failure_injection() {
        let factory = SyntheticCodecFactory::new().with_audio_options(SyntheticOptions {
            fail_configure: true,
            ..SyntheticOptions::default()
        });
        let encoder = factory.create_encoder(MIME_AUDIO_AAC).unwrap();
        assert!(encoder.configure(&audio_format()).is_err());
        assert!(factory.create_encoder("video/hevc").is_err());
    }
}
