//! Frame rendering into the video encoder's input surface

pub mod bridge;

pub use bridge::{FrameBridge, FrameRenderer, Transform, IDENTITY};
