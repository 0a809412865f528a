//! Error types and handling
//!
//! Common error types used across the pipeline.

use crate::codec::TrackKind;
use thiserror::Error;

/// Pipeline-wide error type
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0} encoder already added")]
    AlreadyRegistered(TrackKind),

    #[error("Muxer already started")]
    ContainerAlreadyStarted,

    #[error("{0} encoder reported its output format twice")]
    FormatChangedTwice(TrackKind),

    #[error("Encoder output buffer {0} was null")]
    NullOutputBuffer(usize),

    #[error("{0} encoder produced data before its track was added")]
    MuxerNotStarted(TrackKind),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Audio input error: {0}")]
    AudioInput(String),

    #[error("Render error: {0}")]
    Render(String),
}

impl RecorderError {
    /// Whether this error is a breach of the codec/container contract.
    ///
    /// These abort the worker that observed them; they are never retried.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            RecorderError::ContainerAlreadyStarted
                | RecorderError::FormatChangedTwice(_)
                | RecorderError::NullOutputBuffer(_)
                | RecorderError::MuxerNotStarted(_)
        )
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;
