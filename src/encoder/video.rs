//! Video track
//!
//! H.264 encoder with surface input. Pixels are produced by a
//! [`FrameBridge`] that draws into the encoder's input surface each time the
//! worker accepts a frame.

use super::signals::InputFeed;
use super::worker::{EncoderWorker, TrackProfile};
use crate::codec::{HardwareEncoder, InputSurface, MediaFormat, TrackKind};
use crate::muxer::RegisteredEncoder;
use crate::recorder::VideoConfig;
use crate::render::{FrameBridge, FrameRenderer, Transform};
use crate::utils::error::RecorderResult;
use parking_lot::Mutex;
use std::sync::Arc;

pub type VideoEncoder = EncoderWorker<VideoTrack>;

pub struct VideoTrack {
    config: VideoConfig,
    bridge: FrameBridge,
    surface: Mutex<Option<Arc<dyn InputSurface>>>,
}

impl VideoTrack {
    /// Spawns the render thread for `renderer`.
    pub fn new(config: VideoConfig, renderer: Box<dyn FrameRenderer>) -> RecorderResult<Self> {
        Ok(Self {
            config,
            bridge: FrameBridge::spawn("video-render", renderer)?,
            surface: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &VideoConfig {
        &self.config
    }

    pub fn bridge(&self) -> &FrameBridge {
        &self.bridge
    }
}

impl TrackProfile for VideoTrack {
    const KIND: TrackKind = TrackKind::Video;

    fn format(&self) -> MediaFormat {
        self.config.format()
    }

    fn register(worker: Arc<EncoderWorker<Self>>) -> RegisteredEncoder {
        RegisteredEncoder::Video(worker)
    }

    fn on_configured(&self, encoder: &Arc<dyn HardwareEncoder>) -> RecorderResult<()> {
        let surface = encoder.create_input_surface()?;
        self.bridge.set_target(Arc::clone(&surface))?;
        *self.surface.lock() = Some(surface);
        Ok(())
    }

    fn on_frame_accepted(&self, transform: &Transform) {
        self.bridge.draw(Some(transform));
    }

    fn signal_end_of_stream(&self, feed: &InputFeed) -> RecorderResult<()> {
        feed.encoder().signal_end_of_input_stream()?;
        feed.mark_end_of_stream();
        Ok(())
    }

    fn on_unprepared(&self) {
        self.bridge.clear_target();
        if let Some(surface) = self.surface.lock().take() {
            surface.release();
        }
    }

    fn on_release(&self) {
        self.bridge.release();
        if let Some(surface) = self.surface.lock().take() {
            surface.release();
        }
    }
}
