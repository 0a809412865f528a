//! In-memory container
//!
//! Records every backend call and enforces the platform muxer's rules:
//! tracks before start, samples only between start and stop, and
//! non-decreasing timestamps per track.

use crate::codec::{BufferFlags, BufferInfo, ContainerBackend, ContainerFactory, MediaFormat, TrackIndex, TrackKind};
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One recorded backend call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ContainerEvent {
    AddTrack { track: usize, kind: TrackKind },
    Start,
    Write { track: usize, pts: i64, size: usize },
    Stop,
    Release,
}

/// One written sample
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleRecord {
    pub presentation_time_us: i64,
    pub size: usize,
    pub flags: BufferFlags,
}

#[derive(Default)]
struct ContainerLog {
    path: Option<PathBuf>,
    formats: Vec<MediaFormat>,
    samples: Vec<Vec<SampleRecord>>,
    events: Vec<ContainerEvent>,
    started: bool,
    stopped: bool,
    released: bool,
}

/// Read side of a [`MemoryContainer`], usable after the writer dropped it
#[derive(Clone, Default)]
pub struct ContainerProbe {
    log: Arc<Mutex<ContainerLog>>,
}

impl ContainerProbe {
    pub fn path(&self) -> Option<PathBuf> {
        self.log.lock().path.clone()
    }

    pub fn events(&self) -> Vec<ContainerEvent> {
        self.log.lock().events.clone()
    }

    pub fn track_count(&self) -> usize {
        self.log.lock().formats.len()
    }

    pub fn track_kinds(&self) -> Vec<TrackKind> {
        self.log.lock().formats.iter().map(MediaFormat::kind).collect()
    }

    pub fn samples(&self, track: TrackIndex) -> Vec<SampleRecord> {
        self.log
            .lock()
            .samples
            .get(track.0)
            .cloned()
            .unwrap_or_default()
    }

    pub fn start_count(&self) -> usize {
        self.log
            .lock()
            .events
            .iter()
            .filter(|e| matches!(e, ContainerEvent::Start))
            .count()
    }

    /// Started, stopped and released
    pub fn is_finalized(&self) -> bool {
        let log = self.log.lock();
        log.started && log.stopped && log.released
    }

    pub fn is_released(&self) -> bool {
        self.log.lock().released
    }
}

/// [`ContainerBackend`] that keeps everything in memory
pub struct MemoryContainer {
    probe: ContainerProbe,
}

impl MemoryContainer {
    pub fn new() -> (Self, ContainerProbe) {
        let probe = ContainerProbe::default();
        (
            Self {
                probe: probe.clone(),
            },
            probe,
        )
    }
}

impl ContainerBackend for MemoryContainer {
    fn add_track(&mut self, format: &MediaFormat) -> RecorderResult<TrackIndex> {
        let mut log = self.probe.log.lock();
        if log.started {
            return Err(RecorderError::Container("muxer already started".into()));
        }
        let track = log.formats.len();
        log.formats.push(format.clone());
        log.samples.push(Vec::new());
        log.events.push(ContainerEvent::AddTrack {
            track,
            kind: format.kind(),
        });
        Ok(TrackIndex(track))
    }

    fn start(&mut self) -> RecorderResult<()> {
        let mut log = self.probe.log.lock();
        if log.started || log.released {
            return Err(RecorderError::Container("muxer cannot be started".into()));
        }
        if log.formats.is_empty() {
            return Err(RecorderError::Container("muxer has no tracks".into()));
        }
        log.started = true;
        log.events.push(ContainerEvent::Start);
        Ok(())
    }

    fn write_sample_data(
        &mut self,
        track: TrackIndex,
        data: &[u8],
        info: &BufferInfo,
    ) -> RecorderResult<()> {
        let mut log = self.probe.log.lock();
        if !log.started || log.stopped {
            return Err(RecorderError::Container("muxer is not started".into()));
        }
        let Some(samples) = log.samples.get_mut(track.0) else {
            return Err(RecorderError::Container(format!("unknown track {}", track.0)));
        };
        if let Some(last) = samples.last() {
            if info.presentation_time_us < last.presentation_time_us {
                return Err(RecorderError::Container(format!(
                    "timestamp {} before {} on track {}",
                    info.presentation_time_us, last.presentation_time_us, track.0
                )));
            }
        }
        samples.push(SampleRecord {
            presentation_time_us: info.presentation_time_us,
            size: data.len(),
            flags: info.flags,
        });
        log.events.push(ContainerEvent::Write {
            track: track.0,
            pts: info.presentation_time_us,
            size: data.len(),
        });
        Ok(())
    }

    fn stop(&mut self) -> RecorderResult<()> {
        let mut log = self.probe.log.lock();
        if !log.started || log.stopped {
            return Err(RecorderError::Container("stop called in invalid state".into()));
        }
        log.stopped = true;
        log.events.push(ContainerEvent::Stop);
        Ok(())
    }

    fn release(&mut self) {
        let mut log = self.probe.log.lock();
        if !log.released {
            log.released = true;
            log.events.push(ContainerEvent::Release);
        }
    }
}

/// Creates a [`MemoryContainer`] per path and keeps its probe
#[derive(Default)]
pub struct MemoryContainerFactory {
    probes: Mutex<Vec<ContainerProbe>>,
}

impl MemoryContainerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_probe(&self) -> Option<ContainerProbe> {
        self.probes.lock().last().cloned()
    }
}

impl ContainerFactory for MemoryContainerFactory {
    fn create(&self, path: &Path) -> RecorderResult<Box<dyn ContainerBackend>> {
        let (container, probe) = MemoryContainer::new();
        probe.log.lock().path = Some(path.to_path_buf());
        self.probes.lock().push(probe);
        Ok(Box::new(container))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AacProfile, AudioFormat, MIME_AUDIO_AAC};

    fn format() -> MediaFormat {
        MediaFormat::Audio(AudioFormat {
            mime: MIME_AUDIO_AAC.to_string(),
            sample_rate: 44_100,
            channels: 1,
            bit_rate: 64_000,
            profile: AacProfile::Lc,
        })
    }

    fn info(pts: i64) -> BufferInfo {
        BufferInfo {
            offset: 0,
            size: 2,
            presentation_time_us: pts,
            flags: BufferFlags::NONE,
        }
    }

    #[test]
    fn test_rejects_write_before_start() {
        let (mut container, _probe) = MemoryContainer::new();
        let track = container.add_track(&format()).unwrap();
        assert!(container.write_sample_data(track, &[0, 1], &info(0)).is_err());
    }

    #[test]
    fn test_rejects_track_after_start() {
        let (mut container, _probe) = MemoryContainer::new();
        container.add_track(&format()).unwrap();
        container.start().unwrap();
        assert!(container.add_track(&format()).is_err());
    }

    #[test]
    fn test_rejects_backward_timestamps() {
        let (mut container, probe) = MemoryContainer::new();
        let track = container.add_track(&format()).unwrap();
        container.start().unwrap();
        container.write_sample_data(track, &[0, 1], &info(20)).unwrap();
        assert!(container.write_sample_data(track, &[0, 1], &info(10)).is_err());
        container.stop().unwrap();
        container.release();
        assert!(probe.is_finalized());
        assert_eq!(probe.samples(track).len(), 1);
    }
}
