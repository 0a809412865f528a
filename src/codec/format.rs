//! Media format and buffer descriptors
//!
//! Plain data passed between the encoders and the container.

use serde::{Deserialize, Serialize};
use std::fmt;

/// H.264 / AVC
pub const MIME_VIDEO_AVC: &str = "video/avc";

/// AAC in LATM framing
pub const MIME_AUDIO_AAC: &str = "audio/mp4a-latm";

/// Kind of elementary stream a track carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

/// AAC object type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AacProfile {
    /// Low complexity
    Lc,
    /// High efficiency (SBR)
    He,
}

/// How the encoder receives its input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorFormat {
    /// Frames are rendered into an encoder-owned surface
    Surface,
    /// Planar YUV 4:2:0 byte buffers
    Yuv420,
}

/// Audio encoder output/input format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub mime: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_rate: u32,
    pub profile: AacProfile,
}

/// Video encoder output/input format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFormat {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub bit_rate: u32,
    pub frame_rate: u32,
    /// Seconds between key frames
    pub i_frame_interval: u32,
    pub color_format: ColorFormat,
}

/// Format of one elementary stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MediaFormat {
    Audio(AudioFormat),
    Video(VideoFormat),
}

impl MediaFormat {
    pub fn kind(&self) -> TrackKind {
        match self {
            MediaFormat::Audio(_) => TrackKind::Audio,
            MediaFormat::Video(_) => TrackKind::Video,
        }
    }

    pub fn mime(&self) -> &str {
        match self {
            MediaFormat::Audio(f) => &f.mime,
            MediaFormat::Video(f) => &f.mime,
        }
    }
}

/// Flags attached to a codec buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferFlags {
    pub key_frame: bool,
    /// Codec-specific data (SPS/PPS, AudioSpecificConfig); never written as a sample
    pub codec_config: bool,
    pub end_of_stream: bool,
}

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags {
        key_frame: false,
        codec_config: false,
        end_of_stream: false,
    };

    pub const END_OF_STREAM: BufferFlags = BufferFlags {
        key_frame: false,
        codec_config: false,
        end_of_stream: true,
    };
}

/// Metadata for one dequeued output buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

/// Opaque index of a track inside the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackIndex(pub usize);

/// Result of polling for a free input buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStatus {
    Buffer(usize),
    TryAgainLater,
}

/// Result of polling the encoder's output queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStatus {
    /// No output within the timeout
    TryAgainLater,
    /// The output format is now known; query it with `output_format`
    FormatChanged,
    /// Output buffer handles were reallocated
    BuffersChanged,
    /// An output buffer is ready
    Buffer { index: usize, info: BufferInfo },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_format_kind_and_mime() {
        let format = MediaFormat::Audio(AudioFormat {
            mime: MIME_AUDIO_AAC.to_string(),
            sample_rate: 44_100,
            channels: 1,
            bit_rate: 64_000,
            profile: AacProfile::Lc,
        });
        assert_eq!(format.kind(), TrackKind::Audio);
        assert_eq!(format.mime(), "audio/mp4a-latm");
    }

    #[test]
    fn test_media_format_serializes_tagged() {
        let format = MediaFormat::Video(VideoFormat {
            mime: MIME_VIDEO_AVC.to_string(),
            width: 640,
            height: 480,
            bit_rate: 800_000,
            frame_rate: 25,
            i_frame_interval: 10,
            color_format: ColorFormat::Surface,
        });
        let json = serde_json::to_value(&format).unwrap();
        assert_eq!(json["kind"], "video");
        assert_eq!(json["frameRate"], 25);
        assert_eq!(json["colorFormat"], "surface");
    }
}
