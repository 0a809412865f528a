//! Container multiplexing
//!
//! A single writer per recording; encoders register with it and share it.

pub mod writer;

pub use writer::{ContainerWriter, RegisteredEncoder, TrackStats, WriterStats};
