//! Recording session
//!
//! Builds the container writer and the track encoders for one output file
//! and drives them through prepare, start and stop.

use super::output::capture_file_path;
use super::state::{RecorderConfig, RecordingState, RecordingSummary, TrackOutcome};
use crate::capture::AudioInputProvider;
use crate::codec::{ContainerFactory, EncoderFactory, TrackKind};
use crate::encoder::{AudioEncoder, AudioTrack, EncoderListener, StopStatus, VideoEncoder, VideoTrack};
use crate::muxer::ContainerWriter;
use crate::render::{FrameRenderer, Transform, IDENTITY};
use crate::utils::error::{RecorderError, RecorderResult};
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, RwLock};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

/// How long dropping a live session waits for its encoders
const DROP_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Events emitted during recording
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingEvent {
    /// An encoder is configured and running
    Prepared(TrackKind),
    /// Every encoder is capturing
    Started,
    /// An encoder released its resources
    TrackStopped { kind: TrackKind, status: StopStatus },
    /// Every encoder stopped and the container is finalized
    Finished,
    /// An encoder failed
    Error(String),
}

/// Platform pieces a session records through
pub struct SessionBackends {
    pub containers: Arc<dyn ContainerFactory>,
    pub codecs: Arc<dyn EncoderFactory>,
    /// Required when audio is configured
    pub audio_input: Option<Arc<dyn AudioInputProvider>>,
    /// Required when video is configured
    pub renderer: Option<Box<dyn FrameRenderer>>,
}

#[derive(Default)]
struct Progress {
    remaining: usize,
    outcomes: Vec<(TrackKind, StopStatus)>,
    ended: Option<(Instant, DateTime<Utc>)>,
}

/// Receives encoder callbacks and turns them into session events
struct SessionListener {
    state: Arc<RwLock<RecordingState>>,
    event_tx: broadcast::Sender<RecordingEvent>,
    progress: Mutex<Progress>,
    finished: Condvar,
}

impl SessionListener {
    fn status(&self, kind: TrackKind) -> Option<StopStatus> {
        self.progress
            .lock()
            .outcomes
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, status)| status.clone())
    }

    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut progress = self.progress.lock();
        while progress.ended.is_none() {
            if self.finished.wait_until(&mut progress, deadline).timed_out() {
                return progress.ended.is_some();
            }
        }
        true
    }

    fn ended(&self) -> Option<(Instant, DateTime<Utc>)> {
        self.progress.lock().ended
    }
}

impl EncoderListener for SessionListener {
    fn on_prepared(&self, kind: TrackKind) {
        tracing::info!("{} encoder prepared", kind);
        let _ = self.event_tx.send(RecordingEvent::Prepared(kind));
    }

    fn on_stopped(&self, kind: TrackKind, status: StopStatus) {
        tracing::info!("{} encoder stopped: {:?}", kind, status);
        let mut progress = self.progress.lock();
        if let StopStatus::Failed { reason } = &status {
            let _ = self.event_tx.send(RecordingEvent::Error(format!("{}: {}", kind, reason)));
        }
        progress.outcomes.push((kind, status.clone()));
        let _ = self.event_tx.send(RecordingEvent::TrackStopped { kind, status });

        progress.remaining = progress.remaining.saturating_sub(1);
        if progress.remaining == 0 && progress.ended.is_none() {
            progress.ended = Some((Instant::now(), Utc::now()));
            *self.state.write() = RecordingState::Complete;
            let _ = self.event_tx.send(RecordingEvent::Finished);
            self.finished.notify_all();
            tracing::info!("Recording finished");
        }
    }
}

/// One recording into one container file
pub struct RecordingSession {
    id: Uuid,
    state: Arc<RwLock<RecordingState>>,
    writer: Arc<ContainerWriter>,
    video: Option<Arc<VideoEncoder>>,
    audio: Option<Arc<AudioEncoder>>,
    listener: Arc<SessionListener>,
    event_tx: broadcast::Sender<RecordingEvent>,
    started: Mutex<Option<(Instant, DateTime<Utc>)>>,
}

impl RecordingSession {
    /// Create the output file and the encoders for `config`.
    ///
    /// Spawns the encoder threads; must not be called from async context.
    pub fn new(config: &RecorderConfig, backends: SessionBackends) -> RecorderResult<Self> {
        config.validate()?;
        fs::create_dir_all(&config.output_dir)?;
        let path = capture_file_path(&config.output_dir, config.extension());
        let writer = ContainerWriter::create(backends.containers.as_ref(), &path)?;

        let (event_tx, _) = broadcast::channel(100);
        let state = Arc::new(RwLock::new(RecordingState::Idle));
        let listener = Arc::new(SessionListener {
            state: Arc::clone(&state),
            event_tx: event_tx.clone(),
            progress: Mutex::new(Progress {
                remaining: config.video.is_some() as usize + config.audio.is_some() as usize,
                ..Progress::default()
            }),
            finished: Condvar::new(),
        });

        let video = match &config.video {
            Some(video_config) => {
                let renderer = backends.renderer.ok_or_else(|| {
                    RecorderError::Config("video track requires a frame renderer".into())
                })?;
                let track = VideoTrack::new(video_config.clone(), renderer)?;
                Some(VideoEncoder::new(
                    &writer,
                    listener.clone(),
                    Arc::clone(&backends.codecs),
                    track,
                )?)
            }
            None => None,
        };
        let audio = match &config.audio {
            Some(audio_config) => {
                let provider = backends.audio_input.ok_or_else(|| {
                    RecorderError::Config("audio track requires an audio input".into())
                })?;
                let track = AudioTrack::new(audio_config.clone(), provider);
                Some(AudioEncoder::new(
                    &writer,
                    listener.clone(),
                    Arc::clone(&backends.codecs),
                    track,
                )?)
            }
            None => None,
        };

        let id = Uuid::new_v4();
        tracing::info!("Session {} recording to {}", id, path.display());
        Ok(Self {
            id,
            state,
            writer,
            video,
            audio,
            listener,
            event_tx,
            started: Mutex::new(None),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn output_path(&self) -> &Path {
        self.writer.output_path()
    }

    pub fn writer(&self) -> &Arc<ContainerWriter> {
        &self.writer
    }

    pub fn video(&self) -> Option<&Arc<VideoEncoder>> {
        self.video.as_ref()
    }

    pub fn audio(&self) -> Option<&Arc<AudioEncoder>> {
        self.audio.as_ref()
    }

    pub fn state(&self) -> RecordingState {
        *self.state.read()
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    /// Prepare every encoder, then start them.
    ///
    /// On error nothing was started and the session stays idle.
    pub fn start(&self) -> RecorderResult<()> {
        if *self.state.read() != RecordingState::Idle {
            return Err(RecorderError::InvalidState("session already started".into()));
        }

        if let Err(e) = self.writer.prepare() {
            tracing::error!("Failed to prepare encoders: {}", e);
            return Err(e);
        }
        self.writer.start_recording();

        *self.started.lock() = Some((Instant::now(), Utc::now()));
        *self.state.write() = RecordingState::Recording;
        let _ = self.event_tx.send(RecordingEvent::Started);
        tracing::info!("Recording started");
        Ok(())
    }

    /// Signal that the camera produced a frame. Returns whether it will be encoded.
    pub fn frame_available(&self, transform: Option<&Transform>) -> bool {
        if *self.state.read() != RecordingState::Recording {
            return false;
        }
        match &self.video {
            Some(video) => video.frame_available_soon_with(transform.unwrap_or(&IDENTITY)),
            None => false,
        }
    }

    /// Request every encoder to stop. Completion is reported by
    /// [`RecordingEvent::Finished`] and [`wait_finished`](Self::wait_finished).
    pub fn stop(&self) -> RecorderResult<()> {
        {
            let mut state = self.state.write();
            match *state {
                RecordingState::Idle => {
                    return Err(RecorderError::InvalidState("not recording".into()));
                }
                RecordingState::Stopping | RecordingState::Complete => return Ok(()),
                RecordingState::Recording => *state = RecordingState::Stopping,
            }
        }
        tracing::info!("Stopping recording");
        self.writer.stop_recording();
        Ok(())
    }

    /// Block until every encoder stopped. Returns `false` on timeout.
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        self.listener.wait(timeout)
    }

    /// Milliseconds between start and the last encoder stopping (or now)
    pub fn duration_ms(&self) -> f64 {
        let Some((start, _)) = *self.started.lock() else {
            return 0.0;
        };
        let end = self.listener.ended().map(|(end, _)| end).unwrap_or_else(Instant::now);
        end.saturating_duration_since(start).as_secs_f64() * 1000.0
    }

    pub fn summary(&self) -> RecordingSummary {
        let mut encoders = Vec::new();
        if let Some(video) = &self.video {
            encoders.push(TrackOutcome {
                kind: TrackKind::Video,
                status: self.listener.status(TrackKind::Video),
                stats: video.stats(),
            });
        }
        if let Some(audio) = &self.audio {
            encoders.push(TrackOutcome {
                kind: TrackKind::Audio,
                status: self.listener.status(TrackKind::Audio),
                stats: audio.stats(),
            });
        }
        RecordingSummary {
            session_id: self.id,
            state: self.state(),
            started_at: self.started.lock().map(|(_, at)| at),
            ended_at: self.listener.ended().map(|(_, at)| at),
            duration_ms: self.duration_ms(),
            encoders,
            container: self.writer.stats(),
        }
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if self.state() == RecordingState::Recording {
            tracing::warn!("Session {} dropped while recording", self.id);
            if let Err(e) = self.stop() {
                tracing::error!("Failed to stop session: {}", e);
            }
        }
        if self.state() == RecordingState::Stopping && !self.wait_finished(DROP_STOP_TIMEOUT) {
            tracing::warn!("Session {} encoders still draining at drop", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        ContainerEvent, MemoryContainerFactory, SyntheticCodecFactory, SyntheticOptions,
        TestPatternRenderer, ToneAudioProvider,
    };
    use crate::capture::AudioSourceKind;
    use crate::codec::{TrackIndex, MIME_VIDEO_AVC};
    use crate::recorder::{AudioConfig, VideoConfig};
    use std::thread;
    use tempfile::tempdir;

    fn small_video() -> VideoConfig {
        VideoConfig {
            width: 64,
            height: 36,
            ..VideoConfig::default()
        }
    }

    fn config(dir: &Path, video: bool, audio: bool) -> RecorderConfig {
        RecorderConfig {
            output_dir: dir.to_path_buf(),
            video: video.then(small_video),
            audio: audio.then(AudioConfig::default),
            demo_seconds: 0.0,
        }
    }

    fn backends(
        containers: Arc<MemoryContainerFactory>,
        codecs: SyntheticCodecFactory,
        audio: ToneAudioProvider,
    ) -> SessionBackends {
        SessionBackends {
            containers,
            codecs: Arc::new(codecs),
            audio_input: Some(Arc::new(audio)),
            renderer: Some(Box::new(TestPatternRenderer::new(64, 36))),
        }
    }

    fn feed_frames(session: &RecordingSession, count: usize, interval: Duration) {
        for _ in 0..count {
            session.frame_available(None);
            thread::sleep(interval);
        }
    }

    fn assert_strictly_increasing(samples: &[crate::backend::SampleRecord]) {
        for pair in samples.windows(2) {
            assert!(pair[0].presentation_time_us < pair[1].presentation_time_us);
        }
    }

    #[test]
    fn test_audio_and_video_session() {
        let dir = tempdir().unwrap();
        let containers = Arc::new(MemoryContainerFactory::new());
        let session = RecordingSession::new(
            &config(dir.path(), true, true),
            backends(containers.clone(), SyntheticCodecFactory::new(), ToneAudioProvider::default()),
        )
        .unwrap();
        let mut events = session.subscribe();
        assert_eq!(session.output_path().extension().and_then(|e| e.to_str()), Some("mp4"));

        session.start().unwrap();
        assert_eq!(session.state(), RecordingState::Recording);
        feed_frames(&session, 100, Duration::from_millis(20));
        session.stop().unwrap();
        assert!(session.wait_finished(Duration::from_secs(10)));
        assert_eq!(session.state(), RecordingState::Complete);

        let probe = containers.last_probe().unwrap();
        assert_eq!(probe.track_count(), 2);
        assert!(probe.is_finalized());
        let events_log = probe.events();
        let stop_at = events_log
            .iter()
            .position(|e| *e == ContainerEvent::Stop)
            .unwrap();
        assert!(events_log[stop_at..]
            .iter()
            .all(|e| !matches!(e, ContainerEvent::Write { .. })));
        assert_eq!(probe.start_count(), 1);
        for track in 0..2 {
            let samples = probe.samples(TrackIndex(track));
            assert!(!samples.is_empty(), "track {track} is empty");
            assert_strictly_increasing(&samples);
        }

        let summary = session.summary();
        assert!(summary.container.finalized);
        assert!(summary
            .encoders
            .iter()
            .all(|e| e.status == Some(StopStatus::Completed)));
        assert!(session.duration_ms() > 0.0);

        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            received.push(event);
        }
        assert!(received.contains(&RecordingEvent::Prepared(TrackKind::Video)));
        assert!(received.contains(&RecordingEvent::Prepared(TrackKind::Audio)));
        assert!(received.contains(&RecordingEvent::Started));
        assert_eq!(received.last(), Some(&RecordingEvent::Finished));
    }

    #[test]
    fn test_video_only_session() {
        let dir = tempdir().unwrap();
        let containers = Arc::new(MemoryContainerFactory::new());
        let session = RecordingSession::new(
            &config(dir.path(), true, false),
            backends(containers.clone(), SyntheticCodecFactory::new(), ToneAudioProvider::default()),
        )
        .unwrap();
        assert_eq!(session.writer().encoder_count(), 1);

        session.start().unwrap();
        feed_frames(&session, 10, Duration::from_millis(20));
        session.stop().unwrap();
        assert!(session.wait_finished(Duration::from_secs(10)));

        let probe = containers.last_probe().unwrap();
        assert_eq!(probe.track_kinds(), vec![TrackKind::Video]);
        assert!(probe.is_finalized());
        assert!(!probe.samples(TrackIndex(0)).is_empty());
    }

    #[test]
    fn test_audio_only_session_uses_m4a() {
        let dir = tempdir().unwrap();
        let containers = Arc::new(MemoryContainerFactory::new());
        let session = RecordingSession::new(
            &config(dir.path(), false, true),
            backends(containers.clone(), SyntheticCodecFactory::new(), ToneAudioProvider::default()),
        )
        .unwrap();
        assert_eq!(session.output_path().extension().and_then(|e| e.to_str()), Some("m4a"));
        assert!(!session.frame_available(None));

        session.start().unwrap();
        thread::sleep(Duration::from_millis(300));
        session.stop().unwrap();
        assert!(session.wait_finished(Duration::from_secs(10)));

        let probe = containers.last_probe().unwrap();
        assert_eq!(probe.track_kinds(), vec![TrackKind::Audio]);
        assert!(probe.is_finalized());
        assert_strictly_increasing(&probe.samples(TrackIndex(0)));
    }

    #[test]
    fn test_prepare_failure_leaves_session_idle() {
        let dir = tempdir().unwrap();
        let codecs = SyntheticCodecFactory::new().with_video_options(SyntheticOptions {
            fail_configure: true,
            ..SyntheticOptions::default()
        });
        let session = RecordingSession::new(
            &config(dir.path(), true, true),
            backends(Arc::new(MemoryContainerFactory::new()), codecs, ToneAudioProvider::default()),
        )
        .unwrap();

        assert!(matches!(session.start(), Err(RecorderError::Codec(_))));
        assert_eq!(session.state(), RecordingState::Idle);
        assert!(!session.frame_available(None));
        assert!(matches!(session.stop(), Err(RecorderError::InvalidState(_))));
    }

    #[test]
    fn test_audio_prepare_failure_rolls_back_video() {
        let dir = tempdir().unwrap();
        let containers = Arc::new(MemoryContainerFactory::new());
        let codecs = Arc::new(SyntheticCodecFactory::new().with_audio_options(SyntheticOptions {
            fail_configure: true,
            ..SyntheticOptions::default()
        }));
        let session = RecordingSession::new(
            &config(dir.path(), true, true),
            SessionBackends {
                containers: containers.clone(),
                codecs: codecs.clone(),
                audio_input: Some(Arc::new(ToneAudioProvider::default())),
                renderer: Some(Box::new(TestPatternRenderer::new(64, 36))),
            },
        )
        .unwrap();

        assert!(matches!(session.start(), Err(RecorderError::Codec(_))));
        assert_eq!(session.state(), RecordingState::Idle);
        let video = session.video().unwrap();
        assert!(codecs.encoder(MIME_VIDEO_AVC).unwrap().is_released());
        assert!(!video.profile().bridge().has_target());
        assert!(!video.is_capturing());

        // A retry prepares video again and fails on audio, not on state
        assert!(matches!(session.start(), Err(RecorderError::Codec(_))));
        assert!(codecs.encoder(MIME_VIDEO_AVC).unwrap().is_released());
        assert_eq!(session.state(), RecordingState::Idle);
        let probe = containers.last_probe().unwrap();
        assert_eq!(probe.start_count(), 0);
    }

    #[test]
    fn test_missing_audio_input_still_finishes() {
        let dir = tempdir().unwrap();
        let containers = Arc::new(MemoryContainerFactory::new());
        let provider = Arc::new(ToneAudioProvider::default().with_unavailable(&AudioSourceKind::PRIORITY));
        let session = RecordingSession::new(
            &config(dir.path(), true, true),
            SessionBackends {
                containers: containers.clone(),
                codecs: Arc::new(SyntheticCodecFactory::new()),
                audio_input: Some(provider.clone()),
                renderer: Some(Box::new(TestPatternRenderer::new(64, 36))),
            },
        )
        .unwrap();

        session.start().unwrap();
        feed_frames(&session, 10, Duration::from_millis(20));
        session.stop().unwrap();
        assert!(session.wait_finished(Duration::from_secs(10)));

        assert_eq!(provider.attempts(), AudioSourceKind::PRIORITY.to_vec());
        let probe = containers.last_probe().unwrap();
        assert!(probe.is_released());
        assert_eq!(session.state(), RecordingState::Complete);
    }

    #[test]
    fn test_stop_twice_is_harmless() {
        let dir = tempdir().unwrap();
        let session = RecordingSession::new(
            &config(dir.path(), true, false),
            backends(
                Arc::new(MemoryContainerFactory::new()),
                SyntheticCodecFactory::new(),
                ToneAudioProvider::default(),
            ),
        )
        .unwrap();
        let mut events = session.subscribe();
        session.start().unwrap();
        feed_frames(&session, 3, Duration::from_millis(20));
        session.stop().unwrap();
        session.stop().unwrap();
        assert!(session.wait_finished(Duration::from_secs(10)));
        session.stop().unwrap();

        let mut stopped = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, RecordingEvent::TrackStopped { .. }) {
                stopped += 1;
            }
        }
        assert_eq!(stopped, 1);
    }

    #[test]
    fn test_video_requires_renderer() {
        let dir = tempdir().unwrap();
        let result = RecordingSession::new(
            &config(dir.path(), true, false),
            SessionBackends {
                containers: Arc::new(MemoryContainerFactory::new()),
                codecs: Arc::new(SyntheticCodecFactory::new()),
                audio_input: None,
                renderer: None,
            },
        );
        assert!(matches!(result, Err(RecorderError::Config(_))));
    }
}
