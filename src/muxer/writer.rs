//! Container writer
//!
//! Owns the output container and the encoder registry. The container opens
//! once every registered encoder has added its track, and is finalized when
//! the last started encoder stops.

use crate::codec::{BufferInfo, ContainerBackend, ContainerFactory, MediaFormat, TrackIndex, TrackKind};
use crate::encoder::{AudioEncoder, VideoEncoder};
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An encoder handed to the writer's registry
pub enum RegisteredEncoder {
    Video(Arc<VideoEncoder>),
    Audio(Arc<AudioEncoder>),
}

impl RegisteredEncoder {
    pub fn kind(&self) -> TrackKind {
        match self {
            RegisteredEncoder::Video(_) => TrackKind::Video,
            RegisteredEncoder::Audio(_) => TrackKind::Audio,
        }
    }
}

/// Per-track write counters
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStats {
    pub index: usize,
    pub kind: TrackKind,
    pub samples: u64,
    pub bytes: u64,
    pub last_pts_us: Option<i64>,
}

/// Snapshot of the writer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriterStats {
    pub output_path: PathBuf,
    pub opened: bool,
    pub finalized: bool,
    pub tracks: Vec<TrackStats>,
    /// Samples dropped because the container was not open yet
    pub dropped_samples: u64,
}

struct WriterState {
    backend: Option<Box<dyn ContainerBackend>>,
    video: Option<Arc<VideoEncoder>>,
    audio: Option<Arc<AudioEncoder>>,
    encoder_count: usize,
    started_count: usize,
    is_started: bool,
    ever_opened: bool,
    finalized: bool,
    tracks: Vec<TrackStats>,
    dropped_samples: u64,
}

/// Multiplexes the encoded tracks of one recording into one file
pub struct ContainerWriter {
    state: Mutex<WriterState>,
    started: Condvar,
    epoch: Instant,
    output_path: PathBuf,
}

impl ContainerWriter {
    pub fn new(backend: Box<dyn ContainerBackend>, output_path: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(WriterState {
                backend: Some(backend),
                video: None,
                audio: None,
                encoder_count: 0,
                started_count: 0,
                is_started: false,
                ever_opened: false,
                finalized: false,
                tracks: Vec::new(),
                dropped_samples: 0,
            }),
            started: Condvar::new(),
            epoch: Instant::now(),
            output_path,
        })
    }

    /// Open `path` through `factory`.
    pub fn create(factory: &dyn ContainerFactory, path: &Path) -> RecorderResult<Arc<Self>> {
        let backend = factory.create(path)?;
        tracing::info!("Container created: {}", path.display());
        Ok(Self::new(backend, path.to_path_buf()))
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Clock origin shared by every track's timestamps
    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Register an encoder. At most one per kind.
    pub fn add_encoder(&self, encoder: RegisteredEncoder) -> RecorderResult<()> {
        let mut state = self.state.lock();
        if state.is_started || state.finalized {
            return Err(RecorderError::ContainerAlreadyStarted);
        }
        match encoder {
            RegisteredEncoder::Video(video) => {
                if state.video.is_some() {
                    return Err(RecorderError::AlreadyRegistered(TrackKind::Video));
                }
                state.video = Some(video);
            }
            RegisteredEncoder::Audio(audio) => {
                if state.audio.is_some() {
                    return Err(RecorderError::AlreadyRegistered(TrackKind::Audio));
                }
                state.audio = Some(audio);
            }
        }
        state.encoder_count = state.video.is_some() as usize + state.audio.is_some() as usize;
        Ok(())
    }

    fn registered(&self) -> (Option<Arc<VideoEncoder>>, Option<Arc<AudioEncoder>>) {
        let state = self.state.lock();
        (state.video.clone(), state.audio.clone())
    }

    pub fn encoder_count(&self) -> usize {
        self.state.lock().encoder_count
    }

    /// Prepare every registered encoder, video first.
    ///
    /// If one fails, the ones already prepared are rolled back.
    pub fn prepare(&self) -> RecorderResult<()> {
        let (video, audio) = self.registered();
        if let Some(video) = &video {
            video.prepare()?;
        }
        if let Some(audio) = &audio {
            if let Err(e) = audio.prepare() {
                if let Some(video) = &video {
                    video.release_prepared();
                }
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn start_recording(&self) {
        let (video, audio) = self.registered();
        if let Some(video) = video {
            video.start_recording();
        }
        if let Some(audio) = audio {
            audio.start_recording();
        }
    }

    /// Ask every encoder to stop and empty the registry.
    pub fn stop_recording(&self) {
        let (video, audio) = {
            let mut state = self.state.lock();
            (state.video.take(), state.audio.take())
        };
        if let Some(video) = video {
            video.stop_recording();
        }
        if let Some(audio) = audio {
            audio.stop_recording();
        }
    }

    /// Add a track. Fails once the container is open.
    pub fn add_track(&self, format: &MediaFormat) -> RecorderResult<TrackIndex> {
        let mut state = self.state.lock();
        if state.is_started {
            return Err(RecorderError::ContainerAlreadyStarted);
        }
        let backend = state
            .backend
            .as_mut()
            .ok_or_else(|| RecorderError::InvalidState("container already released".into()))?;
        let track = backend.add_track(format)?;
        state.tracks.push(TrackStats {
            index: track.0,
            kind: format.kind(),
            samples: 0,
            bytes: 0,
            last_pts_us: None,
        });
        tracing::info!("Added {} track {} to {}", format.kind(), track.0, self.output_path.display());
        Ok(track)
    }

    /// Count one encoder as ready. Returns whether the container is open.
    pub fn start(&self) -> RecorderResult<bool> {
        let mut state = self.state.lock();
        if state.finalized {
            return Err(RecorderError::InvalidState("container already finalized".into()));
        }
        state.started_count += 1;
        if state.encoder_count > 0 && state.started_count == state.encoder_count && !state.is_started {
            let backend = state
                .backend
                .as_mut()
                .ok_or_else(|| RecorderError::InvalidState("container already released".into()))?;
            backend.start()?;
            state.is_started = true;
            state.ever_opened = true;
            self.started.notify_all();
            tracing::info!("Container started: {}", self.output_path.display());
        }
        Ok(state.is_started)
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().is_started
    }

    pub fn is_finalized(&self) -> bool {
        self.state.lock().finalized
    }

    /// Block until the container opens, waking every `interval` to poll
    /// `should_abort`. Returns `false` if it never opened.
    pub fn wait_until_started<F>(&self, interval: Duration, should_abort: F) -> bool
    where
        F: Fn() -> bool,
    {
        let mut state = self.state.lock();
        while !state.is_started {
            if state.finalized || should_abort() {
                return false;
            }
            self.started.wait_for(&mut state, interval);
        }
        true
    }

    /// Write one encoded sample. Skipped while the container is not open.
    pub fn write_sample_data(
        &self,
        track: TrackIndex,
        data: &[u8],
        info: &BufferInfo,
    ) -> RecorderResult<()> {
        let mut state = self.state.lock();
        if !state.is_started || state.started_count == 0 {
            state.dropped_samples += 1;
            tracing::trace!("container not open, dropping sample on track {}", track.0);
            return Ok(());
        }
        let backend = state
            .backend
            .as_mut()
            .ok_or_else(|| RecorderError::InvalidState("container already released".into()))?;
        backend.write_sample_data(track, data, info)?;
        if let Some(stats) = state.tracks.iter_mut().find(|t| t.index == track.0) {
            stats.samples += 1;
            stats.bytes += data.len() as u64;
            stats.last_pts_us = Some(info.presentation_time_us);
        }
        Ok(())
    }

    /// Count one encoder as finished. The last one finalizes the container.
    pub fn stop(&self) -> RecorderResult<()> {
        let mut state = self.state.lock();
        if state.finalized {
            return Ok(());
        }
        state.started_count = state.started_count.saturating_sub(1);
        if state.encoder_count > 0 && state.started_count == 0 {
            let was_started = state.is_started;
            state.is_started = false;
            state.finalized = true;
            self.started.notify_all();

            let mut result = Ok(());
            if let Some(mut backend) = state.backend.take() {
                if was_started {
                    result = backend.stop();
                } else {
                    tracing::warn!("Container {} never opened", self.output_path.display());
                }
                backend.release();
            }
            tracing::info!("Container finalized: {}", self.output_path.display());
            return result;
        }
        Ok(())
    }

    pub fn stats(&self) -> WriterStats {
        let state = self.state.lock();
        WriterStats {
            output_path: self.output_path.clone(),
            opened: state.ever_opened,
            finalized: state.finalized,
            tracks: state.tracks.clone(),
            dropped_samples: state.dropped_samples,
        }
    }

    #[cfg(test)]
    pub(crate) fn set_expected_tracks(&self, count: usize) {
        self.state.lock().encoder_count = count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ContainerEvent, MemoryContainer};
    use crate::codec::{AacProfile, AudioFormat, BufferFlags, MIME_AUDIO_AAC};

    fn audio_format() -> MediaFormat {
        MediaFormat::Audio(AudioFormat {
            mime: MIME_AUDIO_AAC.to_string(),
            sample_rate: 44_100,
            channels: 1,
            bit_rate: 64_000,
            profile: AacProfile::Lc,
        })
    }

    fn sample(pts: i64) -> BufferInfo {
        BufferInfo {
            offset: 0,
            size: 4,
            presentation_time_us: pts,
            flags: BufferFlags::NONE,
        }
    }

    #[test]
    fn test_container_opens_when_every_track_started() {
        let (container, probe) = MemoryContainer::new();
        let writer = ContainerWriter::new(Box::new(container), PathBuf::from("a.mp4"));
        writer.set_expected_tracks(2);

        writer.add_track(&audio_format()).unwrap();
        assert!(!writer.start().unwrap());
        assert!(!writer.is_started());
        writer.add_track(&audio_format()).unwrap();
        assert!(writer.start().unwrap());
        assert!(writer.is_started());
        assert_eq!(probe.start_count(), 1);
    }

    #[test]
    fn test_writes_before_open_are_dropped() {
        let (container, probe) = MemoryContainer::new();
        let writer = ContainerWriter::new(Box::new(container), PathBuf::from("b.mp4"));
        writer.set_expected_tracks(2);
        let track = writer.add_track(&audio_format()).unwrap();
        writer.start().unwrap();

        writer.write_sample_data(track, &[1, 2, 3, 4], &sample(10)).unwrap();

        assert_eq!(probe.samples(track).len(), 0);
        assert_eq!(writer.stats().dropped_samples, 1);
    }

    #[test]
    fn test_add_track_after_open_fails() {
        let (container, _probe) = MemoryContainer::new();
        let writer = ContainerWriter::new(Box::new(container), PathBuf::from("c.mp4"));
        writer.set_expected_tracks(1);
        writer.add_track(&audio_format()).unwrap();
        writer.start().unwrap();

        let err = writer.add_track(&audio_format()).unwrap_err();
        assert!(matches!(err, RecorderError::ContainerAlreadyStarted));
    }

    #[test]
    fn test_last_stop_finalizes_once() {
        let (container, probe) = MemoryContainer::new();
        let writer = ContainerWriter::new(Box::new(container), PathBuf::from("d.mp4"));
        writer.set_expected_tracks(2);
        let first = writer.add_track(&audio_format()).unwrap();
        writer.add_track(&audio_format()).unwrap();
        writer.start().unwrap();
        writer.start().unwrap();
        writer.write_sample_data(first, &[0; 4], &sample(5)).unwrap();

        writer.stop().unwrap();
        assert!(!writer.is_finalized());
        writer.stop().unwrap();
        assert!(writer.is_finalized());
        writer.stop().unwrap();

        let events = probe.events();
        let stops = events.iter().filter(|e| matches!(e, ContainerEvent::Stop)).count();
        assert_eq!(stops, 1);
        assert_eq!(events.last(), Some(&ContainerEvent::Release));
    }

    #[test]
    fn test_unopened_container_released_without_stop() {
        let (container, probe) = MemoryContainer::new();
        let writer = ContainerWriter::new(Box::new(container), PathBuf::from("e.mp4"));
        writer.set_expected_tracks(2);
        writer.add_track(&audio_format()).unwrap();
        writer.start().unwrap();

        writer.stop().unwrap();

        assert!(writer.is_finalized());
        let events = probe.events();
        assert!(!events.contains(&ContainerEvent::Stop));
        assert!(events.contains(&ContainerEvent::Release));
    }

    #[test]
    fn test_wait_until_started_aborts() {
        let (container, _probe) = MemoryContainer::new();
        let writer = ContainerWriter::new(Box::new(container), PathBuf::from("f.mp4"));
        writer.set_expected_tracks(2);
        assert!(!writer.wait_until_started(Duration::from_millis(5), || true));
    }

    #[test]
    fn test_wait_until_started_wakes_on_open() {
        let (container, _probe) = MemoryContainer::new();
        let writer = ContainerWriter::new(Box::new(container), PathBuf::from("g.mp4"));
        writer.set_expected_tracks(2);
        writer.add_track(&audio_format()).unwrap();
        writer.add_track(&audio_format()).unwrap();
        writer.start().unwrap();

        let opener = Arc::clone(&writer);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            opener.start().unwrap();
        });
        assert!(writer.wait_until_started(Duration::from_millis(100), || false));
        handle.join().unwrap();
    }
}
