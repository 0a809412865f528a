//! Worker control flags and the producer-facing input feed

use super::timestamp::PtsSequencer;
use crate::codec::{BufferFlags, HardwareEncoder, InputStatus};
use crate::utils::error::RecorderResult;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Timeout for one input/output dequeue on the codec
pub const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(10);

/// Lifecycle of a worker's processing thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerPhase {
    Init,
    Idle,
    Draining,
    Stopping,
    Released,
}

#[derive(Debug)]
pub(crate) struct WorkerState {
    pub phase: WorkerPhase,
    pub prepared: bool,
    pub capturing: bool,
    pub ever_started: bool,
    pub stop_requested: bool,
    pub end_of_stream: bool,
    pub pending_drains: u32,
}

/// Monitor shared between a worker, its processing thread and its producers
#[derive(Debug)]
pub struct WorkerSignals {
    pub(crate) state: Mutex<WorkerState>,
    pub(crate) wake: Condvar,
}

impl WorkerSignals {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(WorkerState {
                phase: WorkerPhase::Init,
                prepared: false,
                capturing: false,
                ever_started: false,
                stop_requested: false,
                end_of_stream: false,
                pending_drains: 0,
            }),
            wake: Condvar::new(),
        }
    }

    /// Request a drain pass. Returns `false` when the worker is not accepting data.
    pub fn frame_available_soon(&self) -> bool {
        let mut state = self.state.lock();
        if !state.capturing || state.stop_requested {
            return false;
        }
        state.pending_drains += 1;
        self.wake.notify_all();
        true
    }

    pub fn is_capturing(&self) -> bool {
        self.state.lock().capturing
    }

    pub fn is_stop_requested(&self) -> bool {
        self.state.lock().stop_requested
    }

    pub fn end_of_stream(&self) -> bool {
        self.state.lock().end_of_stream
    }

    pub fn phase(&self) -> WorkerPhase {
        self.state.lock().phase
    }

    pub fn pending_drains(&self) -> u32 {
        self.state.lock().pending_drains
    }

    pub(crate) fn mark_end_of_stream(&self) {
        self.state.lock().end_of_stream = true;
    }

    pub(crate) fn set_capturing(&self, capturing: bool) {
        let mut state = self.state.lock();
        state.capturing = capturing;
        self.wake.notify_all();
    }

    /// True while a producer should keep pushing input.
    pub(crate) fn should_capture(&self) -> bool {
        let state = self.state.lock();
        state.capturing && !state.stop_requested && !state.end_of_stream
    }
}

/// Handle given to input producers (the audio capture thread)
#[derive(Clone)]
pub struct InputFeed {
    pub(crate) signals: Arc<WorkerSignals>,
    pub(crate) encoder: Arc<dyn HardwareEncoder>,
    pub(crate) pts: Arc<PtsSequencer>,
}

impl InputFeed {
    /// Copy `data` into the next free codec input buffer.
    ///
    /// An empty `data` queues the end-of-stream marker. Does nothing once the
    /// worker stopped capturing.
    pub fn encode(&self, data: &[u8], presentation_time_us: i64) -> RecorderResult<()> {
        if !self.signals.is_capturing() {
            return Ok(());
        }
        while self.signals.is_capturing() {
            match self.encoder.dequeue_input_buffer(DEQUEUE_TIMEOUT) {
                InputStatus::Buffer(index) => {
                    if data.is_empty() {
                        self.signals.mark_end_of_stream();
                        return self.encoder.queue_input_buffer(
                            index,
                            &[],
                            presentation_time_us,
                            BufferFlags::END_OF_STREAM,
                        );
                    }
                    return self.encoder.queue_input_buffer(
                        index,
                        data,
                        presentation_time_us,
                        BufferFlags::NONE,
                    );
                }
                InputStatus::TryAgainLater => continue,
            }
        }
        Ok(())
    }

    pub fn frame_available_soon(&self) -> bool {
        self.signals.frame_available_soon()
    }

    pub fn should_capture(&self) -> bool {
        self.signals.should_capture()
    }

    pub fn is_capturing(&self) -> bool {
        self.signals.is_capturing()
    }

    pub fn input_pts(&self) -> i64 {
        self.pts.input_pts()
    }

    pub fn encoder(&self) -> &Arc<dyn HardwareEncoder> {
        &self.encoder
    }

    pub(crate) fn mark_end_of_stream(&self) {
        self.signals.mark_end_of_stream();
    }
}
