//! Software backends
//!
//! Implementations of the codec, container, audio input and renderer
//! contracts that run anywhere. The demo binary and the tests use them.

pub mod memory;
pub mod pattern;
pub mod synthetic;
pub mod tone;

pub use memory::{ContainerEvent, ContainerProbe, MemoryContainer, MemoryContainerFactory, SampleRecord};
pub use pattern::TestPatternRenderer;
pub use synthetic::{SyntheticCodecFactory, SyntheticEncoder, SyntheticOptions};
pub use tone::ToneAudioProvider;
