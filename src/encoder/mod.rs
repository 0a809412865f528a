//! Encoder workers
//!
//! One worker per track. Each owns a hardware encoder and a thread that
//! drains it into the shared container writer.

pub mod audio;
pub mod drain;
pub mod signals;
pub mod timestamp;
pub mod video;
pub mod worker;

pub use audio::{AudioEncoder, AudioTrack};
pub use drain::{DrainReport, Drainer, TrackSlot, MAX_EMPTY_POLLS};
pub use signals::{InputFeed, WorkerPhase, WorkerSignals, DEQUEUE_TIMEOUT};
pub use timestamp::{fold_forward, PtsSequencer};
pub use video::{VideoEncoder, VideoTrack};
pub use worker::{EncoderListener, EncoderWorker, StopStatus, TrackProfile, WorkerStats};
