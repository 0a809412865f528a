//! Recording state management
//!
//! Defines the session state machine, configuration and summary types.

use crate::capture::input_buffer_size;
use crate::codec::{
    AacProfile, AudioFormat, ColorFormat, MediaFormat, VideoFormat, MIME_AUDIO_AAC, MIME_VIDEO_AVC,
};
use crate::encoder::{StopStatus, WorkerStats};
use crate::muxer::WriterStats;
use crate::utils::error::{RecorderError, RecorderResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Current state of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// Not started yet
    #[default]
    Idle,
    /// Encoders are capturing
    Recording,
    /// Stop requested, encoders draining
    Stopping,
    /// Every encoder released and the container finalized
    Complete,
}

/// Video encoder bitrate policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum BitRate {
    /// Constant bits per second
    Fixed { bps: u32 },
    /// `bpp * frame_rate * width * height`
    BitsPerPixel { bpp: f32 },
}

impl Default for BitRate {
    fn default() -> Self {
        BitRate::Fixed { bps: 800_000 }
    }
}

/// Video track configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    /// Seconds between key frames
    pub i_frame_interval: u32,
    pub bit_rate: BitRate,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 25,
            i_frame_interval: 10,
            bit_rate: BitRate::default(),
        }
    }
}

impl VideoConfig {
    pub fn bit_rate(&self) -> u32 {
        match self.bit_rate {
            BitRate::Fixed { bps } => bps,
            BitRate::BitsPerPixel { bpp } => {
                (bpp * self.frame_rate as f32 * self.width as f32 * self.height as f32) as u32
            }
        }
    }

    pub fn format(&self) -> MediaFormat {
        MediaFormat::Video(VideoFormat {
            mime: MIME_VIDEO_AVC.to_string(),
            width: self.width,
            height: self.height,
            bit_rate: self.bit_rate(),
            frame_rate: self.frame_rate,
            i_frame_interval: self.i_frame_interval,
            color_format: ColorFormat::Surface,
        })
    }
}

/// Audio track configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_rate: u32,
    /// Bytes read from the input per encode call
    pub samples_per_frame: usize,
    /// Read chunks held by the input's internal buffer
    pub frames_per_buffer: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
            bit_rate: 64_000,
            samples_per_frame: 1024,
            frames_per_buffer: 25,
        }
    }
}

impl AudioConfig {
    pub fn format(&self) -> MediaFormat {
        MediaFormat::Audio(AudioFormat {
            mime: MIME_AUDIO_AAC.to_string(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            bit_rate: self.bit_rate,
            profile: AacProfile::Lc,
        })
    }

    pub fn input_buffer_size(&self, min_buffer_size: Option<usize>) -> usize {
        input_buffer_size(self.samples_per_frame, self.frames_per_buffer, min_buffer_size)
    }
}

/// Configuration for one recording session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    /// Directory the timestamped output file is created in
    pub output_dir: PathBuf,

    /// Video track, if recorded
    pub video: Option<VideoConfig>,

    /// Audio track, if recorded
    pub audio: Option<AudioConfig>,

    /// How long the demo binary records for
    pub demo_seconds: f64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            video: Some(VideoConfig::default()),
            audio: Some(AudioConfig::default()),
            demo_seconds: 2.0,
        }
    }
}

impl RecorderConfig {
    /// Read a JSON configuration file.
    pub fn load(path: &Path) -> RecorderResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: RecorderConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RecorderResult<()> {
        if self.video.is_none() && self.audio.is_none() {
            return Err(RecorderError::Config("no track configured".into()));
        }
        if let Some(video) = &self.video {
            if video.width == 0 || video.height == 0 || video.frame_rate == 0 {
                return Err(RecorderError::Config(format!(
                    "invalid video size {}x{}@{}",
                    video.width, video.height, video.frame_rate
                )));
            }
        }
        if let Some(audio) = &self.audio {
            if audio.sample_rate == 0 || audio.channels == 0 || audio.samples_per_frame < 2 {
                return Err(RecorderError::Config("invalid audio parameters".into()));
            }
        }
        Ok(())
    }

    /// `mp4` when video is recorded, `m4a` for audio-only sessions
    pub fn extension(&self) -> &'static str {
        if self.video.is_some() {
            "mp4"
        } else {
            "m4a"
        }
    }
}

/// Final state of one encoder
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackOutcome {
    pub kind: crate::codec::TrackKind,
    pub status: Option<StopStatus>,
    pub stats: WorkerStats,
}

/// Summary of a recording session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    pub session_id: Uuid,
    pub state: RecordingState,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: f64,
    pub encoders: Vec<TrackOutcome>,
    pub container: WriterStats,
}
