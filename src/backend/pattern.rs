//! Test pattern renderer
//!
//! Stands in for the camera texture: a diagonal gradient that scrolls one
//! pixel per frame, shifted by the transform's translation.

use crate::render::{FrameRenderer, Transform};
use crate::utils::error::{RecorderError, RecorderResult};

pub struct TestPatternRenderer {
    width: u32,
    height: u32,
    frame: u64,
}

impl TestPatternRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frame
    }
}

impl FrameRenderer for TestPatternRenderer {
    fn prepare(&mut self) -> RecorderResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RecorderError::Render("empty render target".into()));
        }
        tracing::debug!("test pattern {}x{}", self.width, self.height);
        Ok(())
    }

    /// RGBA pixels
    fn render(&mut self, transform: &Transform) -> RecorderResult<Vec<u8>> {
        let (width, height) = (self.width as usize, self.height as usize);
        if width == 0 || height == 0 {
            return Err(RecorderError::Render("empty render target".into()));
        }
        let dx = (transform[12] * width as f32) as i64;
        let dy = (transform[13] * height as f32) as i64;
        let shift = self.frame as i64;

        let mut pixels = Vec::with_capacity(width * height * 4);
        for y in 0..height as i64 {
            for x in 0..width as i64 {
                let v = (x + y + shift + dx + dy).rem_euclid(256) as u8;
                pixels.extend_from_slice(&[v, v.wrapping_mul(2), 255 - v, 255]);
            }
        }
        self.frame += 1;
        Ok(pixels)
    }
}
