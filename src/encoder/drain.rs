//! Output drain loop
//!
//! Moves encoded buffers from a codec's output queue into the container.
//! One call is one drain pass; the worker runs a pass per pending
//! `frame_available_soon` and twice around end-of-stream on shutdown.

use super::signals::{WorkerSignals, DEQUEUE_TIMEOUT};
use super::timestamp::PtsSequencer;
use crate::codec::{HardwareEncoder, OutputStatus, TrackIndex, TrackKind};
use crate::muxer::ContainerWriter;
use crate::utils::error::{RecorderError, RecorderResult};
use serde::Serialize;
use std::time::Duration;

/// Consecutive empty polls tolerated before a pass gives up (before end-of-stream)
pub const MAX_EMPTY_POLLS: u32 = 5;

/// Upper bound on empty polls while waiting for the end-of-stream buffer
pub const EOS_POLL_LIMIT: u32 = 300;

/// Slice used when waiting for the other tracks to open the container
const CONTAINER_WAIT_INTERVAL: Duration = Duration::from_millis(100);

/// Track registration state of one worker
#[derive(Debug, Default, Clone, Copy)]
pub struct TrackSlot {
    pub track: Option<TrackIndex>,
}

impl TrackSlot {
    pub fn is_registered(&self) -> bool {
        self.track.is_some()
    }
}

/// Outcome of one drain pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    /// Output polls issued
    pub polls: u32,
    /// Samples handed to the container
    pub samples_written: u32,
    pub end_of_stream: bool,
    /// The pass stopped waiting for a container that never opened
    pub abandoned: bool,
}

/// Borrowed view of everything a drain pass touches
pub struct Drainer<'a> {
    pub kind: TrackKind,
    pub encoder: &'a dyn HardwareEncoder,
    pub writer: &'a ContainerWriter,
    pub signals: &'a WorkerSignals,
    pub pts: &'a PtsSequencer,
}

impl Drainer<'_> {
    /// Run one drain pass.
    ///
    /// Errors are contract violations by the codec or the container and are
    /// fatal for the worker.
    pub fn drain(&self, slot: &mut TrackSlot) -> RecorderResult<DrainReport> {
        let mut report = DrainReport::default();
        let mut empty_polls = 0u32;

        while self.signals.is_capturing() {
            report.polls += 1;
            match self.encoder.dequeue_output_buffer(DEQUEUE_TIMEOUT) {
                OutputStatus::TryAgainLater => {
                    empty_polls += 1;
                    if !self.signals.end_of_stream() {
                        if empty_polls > MAX_EMPTY_POLLS {
                            break;
                        }
                    } else if empty_polls > EOS_POLL_LIMIT {
                        tracing::warn!(
                            "{} encoder never produced end-of-stream, giving up after {} polls",
                            self.kind,
                            empty_polls
                        );
                        break;
                    }
                }
                OutputStatus::BuffersChanged => {
                    tracing::trace!("{} encoder output buffers changed", self.kind);
                }
                OutputStatus::FormatChanged => {
                    if slot.is_registered() {
                        return Err(RecorderError::FormatChangedTwice(self.kind));
                    }
                    let format = self.encoder.output_format()?;
                    tracing::debug!("{} output format: {:?}", self.kind, format);
                    let track = self.writer.add_track(&format)?;
                    slot.track = Some(track);

                    if !self.writer.start()? {
                        let signals = self.signals;
                        let opened = self.writer.wait_until_started(CONTAINER_WAIT_INTERVAL, || {
                            signals.is_stop_requested()
                        });
                        if !opened {
                            tracing::warn!(
                                "{} track gave up waiting for the container to open",
                                self.kind
                            );
                            report.abandoned = true;
                            break;
                        }
                    }
                }
                OutputStatus::Buffer { index, mut info } => {
                    let data = self
                        .encoder
                        .output_buffer(index)
                        .ok_or(RecorderError::NullOutputBuffer(index))?;

                    if info.flags.codec_config {
                        // Already carried by the track format
                        tracing::debug!("{} codec config dropped", self.kind);
                        info.size = 0;
                    }

                    if info.size != 0 {
                        empty_polls = 0;
                        let track = slot.track.ok_or(RecorderError::MuxerNotStarted(self.kind))?;
                        info.presentation_time_us = self.pts.next_output_pts();
                        let end = (info.offset + info.size).min(data.len());
                        let start = info.offset.min(end);
                        self.writer.write_sample_data(track, &data[start..end], &info)?;
                        report.samples_written += 1;
                    }

                    self.encoder.release_output_buffer(index);

                    if info.flags.end_of_stream {
                        self.signals.set_capturing(false);
                        report.end_of_stream = true;
                        break;
                    }
                }
            }
        }

        Ok(report)
    }
}
