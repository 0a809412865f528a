//! Codec and container contracts
//!
//! The pipeline only talks to encoders and containers through these traits.
//! Platform bindings live outside this crate; `crate::backend` provides
//! software implementations.

use super::format::{BufferFlags, BufferInfo, InputStatus, MediaFormat, OutputStatus, TrackIndex};
use crate::utils::error::RecorderResult;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// A hardware encoder instance for one track.
///
/// Methods take `&self`: the platform codec is internally synchronized and is
/// fed from a capture thread while a worker thread drains it.
pub trait HardwareEncoder: Send + Sync {
    fn configure(&self, format: &MediaFormat) -> RecorderResult<()>;

    /// Obtain the drawing surface frames are rendered into.
    ///
    /// Only valid between `configure` and `start` on surface-input encoders.
    fn create_input_surface(&self) -> RecorderResult<Arc<dyn InputSurface>>;

    fn start(&self) -> RecorderResult<()>;

    fn dequeue_input_buffer(&self, timeout: Duration) -> InputStatus;

    /// Fill and submit the input buffer at `index`.
    fn queue_input_buffer(
        &self,
        index: usize,
        data: &[u8],
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> RecorderResult<()>;

    fn dequeue_output_buffer(&self, timeout: Duration) -> OutputStatus;

    /// Payload of a dequeued output buffer, `None` if the codec lost it.
    fn output_buffer(&self, index: usize) -> Option<Vec<u8>>;

    fn output_format(&self) -> RecorderResult<MediaFormat>;

    fn release_output_buffer(&self, index: usize);

    /// End the input of a surface-fed encoder.
    fn signal_end_of_input_stream(&self) -> RecorderResult<()>;

    fn stop(&self) -> RecorderResult<()>;

    fn release(&self);
}

/// Creates encoders by mime type
pub trait EncoderFactory: Send + Sync {
    fn create_encoder(&self, mime: &str) -> RecorderResult<Arc<dyn HardwareEncoder>>;
}

/// Encoder-owned drawing surface
pub trait InputSurface: Send + Sync {
    /// Hand one rendered frame to the encoder.
    fn submit_frame(&self, pixels: &[u8], presentation_time_us: i64) -> RecorderResult<()>;

    fn release(&self);
}

/// The output container (one file)
pub trait ContainerBackend: Send {
    fn add_track(&mut self, format: &MediaFormat) -> RecorderResult<TrackIndex>;

    fn start(&mut self) -> RecorderResult<()>;

    fn write_sample_data(
        &mut self,
        track: TrackIndex,
        data: &[u8],
        info: &BufferInfo,
    ) -> RecorderResult<()>;

    fn stop(&mut self) -> RecorderResult<()>;

    fn release(&mut self);
}

/// Opens a container backend for an output path
pub trait ContainerFactory: Send + Sync {
    fn create(&self, path: &Path) -> RecorderResult<Box<dyn ContainerBackend>>;
}
