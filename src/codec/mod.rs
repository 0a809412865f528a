//! Codec and container interfaces
//!
//! Formats, buffer descriptors and the traits the pipeline drives.

pub mod format;
pub mod traits;

pub use format::{
    AacProfile, AudioFormat, BufferFlags, BufferInfo, ColorFormat, InputStatus, MediaFormat,
    OutputStatus, TrackIndex, TrackKind, VideoFormat, MIME_AUDIO_AAC, MIME_VIDEO_AVC,
};
pub use traits::{
    ContainerBackend, ContainerFactory, EncoderFactory, HardwareEncoder, InputSurface,
};
