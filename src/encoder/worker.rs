//! Encoder worker
//!
//! Each track runs one worker: a dedicated thread that sleeps until a
//! producer announces data, then drains the codec into the shared
//! [`ContainerWriter`]. The track-specific parts (format, input side,
//! end-of-stream) come from a [`TrackProfile`].

use super::drain::{DrainReport, Drainer, TrackSlot};
use super::signals::{InputFeed, WorkerPhase, WorkerSignals};
use super::timestamp::PtsSequencer;
use crate::codec::{EncoderFactory, HardwareEncoder, MediaFormat, TrackKind};
use crate::muxer::{ContainerWriter, RegisteredEncoder};
use crate::render::{Transform, IDENTITY};
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;

/// How a worker ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StopStatus {
    Completed,
    Failed { reason: String },
}

/// Lifecycle callbacks from a worker.
///
/// Called on the worker's own thread, or the caller's thread for `on_prepared`.
pub trait EncoderListener: Send + Sync {
    fn on_prepared(&self, kind: TrackKind);

    fn on_stopped(&self, kind: TrackKind, status: StopStatus);
}

/// Track-specific behavior plugged into [`EncoderWorker`]
pub trait TrackProfile: Send + Sync + Sized + 'static {
    const KIND: TrackKind;

    /// Format the codec is configured with
    fn format(&self) -> MediaFormat;

    /// Wrap a worker for the writer's registry
    fn register(worker: Arc<EncoderWorker<Self>>) -> RegisteredEncoder;

    /// Runs between `configure` and `start` on the codec.
    fn on_configured(&self, _encoder: &Arc<dyn HardwareEncoder>) -> RecorderResult<()> {
        Ok(())
    }

    /// Recording started; `feed` pushes input into the codec.
    fn on_start(&self, _feed: InputFeed) {}

    /// A `frame_available_soon` was accepted.
    fn on_frame_accepted(&self, _transform: &Transform) {}

    /// Tell the codec no more input follows.
    fn signal_end_of_stream(&self, feed: &InputFeed) -> RecorderResult<()>;

    /// Undo `on_configured` after a prepare that will not be followed by a
    /// start. Runs before the codec is released.
    fn on_unprepared(&self) {}

    /// Tear down input resources. Runs before the codec is released.
    fn on_release(&self) {}
}

/// Counters exposed for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub drain_passes: u64,
    pub samples_written: u64,
}

pub(crate) struct WorkerCore<P: TrackProfile> {
    profile: P,
    signals: Arc<WorkerSignals>,
    encoder: Mutex<Option<Arc<dyn HardwareEncoder>>>,
    factory: Arc<dyn EncoderFactory>,
    writer: Weak<ContainerWriter>,
    listener: Arc<dyn EncoderListener>,
    pts: Arc<PtsSequencer>,
    drain_passes: AtomicU64,
    samples_written: AtomicU64,
}

/// A track encoder driven by its own thread
pub struct EncoderWorker<P: TrackProfile> {
    core: Arc<WorkerCore<P>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<P: TrackProfile> EncoderWorker<P> {
    /// Create the worker, register it with `writer` and start its thread.
    ///
    /// Returns once the thread is running. Fails if an encoder of the same
    /// kind is already registered. Must not be called from async context.
    pub fn new(
        writer: &Arc<ContainerWriter>,
        listener: Arc<dyn EncoderListener>,
        factory: Arc<dyn EncoderFactory>,
        profile: P,
    ) -> RecorderResult<Arc<Self>> {
        let core = Arc::new(WorkerCore {
            profile,
            signals: Arc::new(WorkerSignals::new()),
            encoder: Mutex::new(None),
            factory,
            writer: Arc::downgrade(writer),
            listener,
            pts: Arc::new(PtsSequencer::new(writer.epoch())),
            drain_passes: AtomicU64::new(0),
            samples_written: AtomicU64::new(0),
        });
        let worker = Arc::new(Self {
            core,
            thread: Mutex::new(None),
        });
        writer.add_encoder(P::register(Arc::clone(&worker)))?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let core = Arc::clone(&worker.core);
        let handle = thread::Builder::new()
            .name(format!("{}-encoder", P::KIND))
            .spawn(move || core.run(ready_tx))?;
        ready_rx.blocking_recv().map_err(|_| {
            RecorderError::InvalidState(format!("{} encoder thread exited early", P::KIND))
        })?;
        *worker.thread.lock() = Some(handle);

        tracing::debug!("{} encoder worker ready", P::KIND);
        Ok(worker)
    }

    pub fn kind(&self) -> TrackKind {
        P::KIND
    }

    pub fn profile(&self) -> &P {
        &self.core.profile
    }

    /// Create, configure and start the codec.
    pub fn prepare(&self) -> RecorderResult<()> {
        {
            let state = self.core.signals.state.lock();
            if state.prepared {
                return Err(RecorderError::InvalidState(format!(
                    "{} encoder already prepared",
                    P::KIND
                )));
            }
            if state.stop_requested || state.phase == WorkerPhase::Released {
                return Err(RecorderError::InvalidState(format!(
                    "{} encoder already stopped",
                    P::KIND
                )));
            }
        }

        let format = self.core.profile.format();
        tracing::info!("Preparing {} encoder: {:?}", P::KIND, format);
        let encoder = self.core.factory.create_encoder(format.mime())?;
        let configured = encoder
            .configure(&format)
            .and_then(|_| self.core.profile.on_configured(&encoder))
            .and_then(|_| encoder.start());
        if let Err(e) = configured {
            tracing::error!("Failed to prepare {} encoder: {}", P::KIND, e);
            encoder.release();
            return Err(e);
        }

        *self.core.encoder.lock() = Some(encoder);
        {
            let mut state = self.core.signals.state.lock();
            state.prepared = true;
            state.end_of_stream = false;
        }
        self.core.listener.on_prepared(P::KIND);
        Ok(())
    }

    /// Return a prepared, never started worker to its unprepared state.
    ///
    /// The codec is stopped and released; a later `prepare` creates a new one.
    pub fn release_prepared(&self) {
        {
            let mut state = self.core.signals.state.lock();
            if !state.prepared || state.ever_started {
                return;
            }
            state.prepared = false;
        }

        self.core.profile.on_unprepared();
        let encoder = self.core.encoder.lock().take();
        if let Some(encoder) = encoder {
            if let Err(e) = encoder.stop() {
                tracing::warn!("Failed to stop {} encoder: {}", P::KIND, e);
            }
            encoder.release();
        }
        tracing::info!("{} encoder prepare rolled back", P::KIND);
    }

    /// Begin accepting input. No-op unless prepared and not yet started.
    pub fn start_recording(&self) {
        {
            let state = self.core.signals.state.lock();
            if state.capturing || state.stop_requested || state.phase == WorkerPhase::Released {
                return;
            }
        }
        let Some(encoder) = self.core.encoder.lock().clone() else {
            tracing::warn!("{} encoder started before prepare", P::KIND);
            return;
        };
        {
            let mut state = self.core.signals.state.lock();
            if state.capturing || state.stop_requested || state.phase == WorkerPhase::Released {
                return;
            }
            state.capturing = true;
            state.ever_started = true;
            self.core.signals.wake.notify_all();
        }
        tracing::info!("{} encoder recording", P::KIND);
        self.core.profile.on_start(self.core.feed(encoder));
    }

    /// Request shutdown. Idempotent; a no-op on a worker that never started.
    pub fn stop_recording(&self) {
        let mut state = self.core.signals.state.lock();
        if !state.capturing || state.stop_requested {
            return;
        }
        state.stop_requested = true;
        self.core.signals.wake.notify_all();
        tracing::info!("{} encoder stop requested", P::KIND);
    }

    /// Announce new input. Returns `false` if the worker is not accepting data.
    pub fn frame_available_soon(&self) -> bool {
        self.frame_available_soon_with(&IDENTITY)
    }

    /// Like [`frame_available_soon`](Self::frame_available_soon), passing a
    /// texture transform to the input side.
    pub fn frame_available_soon_with(&self, transform: &Transform) -> bool {
        let accepted = self.core.signals.frame_available_soon();
        if accepted {
            self.core.profile.on_frame_accepted(transform);
        }
        accepted
    }

    pub fn is_capturing(&self) -> bool {
        self.core.signals.is_capturing()
    }

    pub fn phase(&self) -> WorkerPhase {
        self.core.signals.phase()
    }

    pub fn signals(&self) -> &WorkerSignals {
        &self.core.signals
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            drain_passes: self.core.drain_passes.load(Ordering::Relaxed),
            samples_written: self.core.samples_written.load(Ordering::Relaxed),
        }
    }

    /// Wait for the worker thread to exit.
    pub fn join(&self) {
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!("{} encoder thread panicked", P::KIND);
            }
        }
    }
}

impl<P: TrackProfile> Drop for EncoderWorker<P> {
    fn drop(&mut self) {
        {
            let mut state = self.core.signals.state.lock();
            state.stop_requested = true;
            self.core.signals.wake.notify_all();
        }
        self.join();
    }
}

enum Action {
    Drain,
    Stop,
}

impl<P: TrackProfile> WorkerCore<P> {
    fn feed(&self, encoder: Arc<dyn HardwareEncoder>) -> InputFeed {
        InputFeed {
            signals: Arc::clone(&self.signals),
            encoder,
            pts: Arc::clone(&self.pts),
        }
    }

    fn run(self: Arc<Self>, ready: oneshot::Sender<()>) {
        self.signals.state.lock().phase = WorkerPhase::Idle;
        let _ = ready.send(());

        let mut slot = TrackSlot::default();
        let outcome = loop {
            let action = {
                let mut state = self.signals.state.lock();
                loop {
                    if state.stop_requested {
                        state.phase = WorkerPhase::Stopping;
                        break Action::Stop;
                    }
                    if state.pending_drains > 0 {
                        state.pending_drains -= 1;
                        state.phase = WorkerPhase::Draining;
                        break Action::Drain;
                    }
                    state.phase = WorkerPhase::Idle;
                    self.signals.wake.wait(&mut state);
                }
            };

            match action {
                Action::Drain => {
                    if let Err(e) = self.drain(&mut slot) {
                        break Err(e);
                    }
                }
                Action::Stop => break self.finish(&mut slot),
            }
        };

        self.release(&slot, outcome);
    }

    fn drain(&self, slot: &mut TrackSlot) -> RecorderResult<DrainReport> {
        let Some(encoder) = self.encoder.lock().clone() else {
            return Ok(DrainReport::default());
        };
        let Some(writer) = self.writer.upgrade() else {
            return Err(RecorderError::InvalidState("container writer dropped".into()));
        };
        let drainer = Drainer {
            kind: P::KIND,
            encoder: encoder.as_ref(),
            writer: &writer,
            signals: &self.signals,
            pts: &self.pts,
        };
        let report = drainer.drain(slot)?;
        self.drain_passes.fetch_add(1, Ordering::Relaxed);
        self.samples_written
            .fetch_add(report.samples_written as u64, Ordering::Relaxed);
        Ok(report)
    }

    /// Final drain, end-of-stream, and the drain that collects it.
    fn finish(&self, slot: &mut TrackSlot) -> RecorderResult<()> {
        if !self.signals.is_capturing() {
            return Ok(());
        }
        self.drain(slot)?;
        let encoder = self.encoder.lock().clone();
        if let Some(encoder) = encoder {
            self.profile.signal_end_of_stream(&self.feed(encoder))?;
        }
        let report = self.drain(slot)?;
        if !report.end_of_stream {
            tracing::warn!("{} encoder stopped without end-of-stream", P::KIND);
        }
        Ok(())
    }

    fn release(&self, slot: &TrackSlot, outcome: RecorderResult<()>) {
        let ever_started = {
            let mut state = self.signals.state.lock();
            state.capturing = false;
            state.ever_started
        };

        self.profile.on_release();
        let encoder = self.encoder.lock().take();
        if let Some(encoder) = encoder {
            if let Err(e) = encoder.stop() {
                tracing::warn!("Failed to stop {} encoder: {}", P::KIND, e);
            }
            encoder.release();
        }

        if slot.is_registered() {
            if let Some(writer) = self.writer.upgrade() {
                if let Err(e) = writer.stop() {
                    tracing::error!("Failed to finalize container: {}", e);
                }
            }
        }

        {
            let mut state = self.signals.state.lock();
            state.stop_requested = true;
            state.pending_drains = 0;
            state.phase = WorkerPhase::Released;
        }

        let status = match outcome {
            Ok(()) => {
                tracing::info!("{} encoder released", P::KIND);
                StopStatus::Completed
            }
            Err(e) => {
                if e.is_protocol_violation() {
                    tracing::error!("{} encoder aborted, codec or container contract broken: {}", P::KIND, e);
                } else {
                    tracing::error!("{} encoder failed: {}", P::KIND, e);
                }
                StopStatus::Failed {
                    reason: e.to_string(),
                }
            }
        };
        if ever_started {
            self.listener.on_stopped(P::KIND, status);
        }
    }
}
