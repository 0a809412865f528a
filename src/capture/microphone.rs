//! Microphone input through cpal
//!
//! Only the `Mic` and `Default` sources map to a device (the host's default
//! input); the other sources report themselves unavailable.

use super::traits::{AudioDeviceInfo, AudioInput, AudioInputConfig, AudioInputProvider, AudioSourceKind};
use crate::utils::error::{RecorderError, RecorderResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, StreamConfig};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

const READ_WAIT: Duration = Duration::from_millis(50);

/// List the host's input devices
pub fn list_input_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let Ok(devices) = host.input_devices() else {
        return Vec::new();
    };
    devices
        .filter_map(|device| device.name().ok())
        .map(|name| AudioDeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
        })
        .collect()
}

/// Opens the default cpal input device
#[derive(Debug, Default)]
pub struct CpalAudioProvider;

impl CpalAudioProvider {
    pub fn new() -> Self {
        Self
    }
}

impl AudioInputProvider for CpalAudioProvider {
    fn min_buffer_size(&self, sample_rate: u32, channels: u16) -> Option<usize> {
        // 40 ms of 16-bit PCM
        Some(sample_rate as usize * channels as usize * 2 / 25)
    }

    fn open(
        &self,
        source: AudioSourceKind,
        config: &AudioInputConfig,
    ) -> RecorderResult<Box<dyn AudioInput>> {
        if !matches!(source, AudioSourceKind::Mic | AudioSourceKind::Default) {
            return Err(RecorderError::AudioInput(format!("{} source not supported", source)));
        }
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| RecorderError::AudioInput("no default input device".into()))?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        tracing::info!(
            "Microphone initialized: {} ({}Hz, {}ch)",
            device_name,
            config.sample_rate,
            config.channels
        );
        Ok(Box::new(CpalInput {
            device,
            config: *config,
            stream: None,
            buffer: Arc::new((Mutex::new(VecDeque::new()), Condvar::new())),
        }))
    }
}

type SharedPcm = Arc<(Mutex<VecDeque<u8>>, Condvar)>;

struct CpalInput {
    device: Device,
    config: AudioInputConfig,
    stream: Option<cpal::Stream>,
    buffer: SharedPcm,
}

impl AudioInput for CpalInput {
    fn start(&mut self) -> RecorderResult<()> {
        let stream_config = StreamConfig {
            channels: self.config.channels,
            sample_rate: cpal::SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let buffer = Arc::clone(&self.buffer);
        let capacity = self.config.buffer_size;

        let stream = self
            .device
            .build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let (queue, ready) = &*buffer;
                    let mut queue = queue.lock();
                    queue.extend(data.iter().flat_map(|sample| sample.to_le_bytes()));
                    // Overrun drops the oldest audio
                    let excess = queue.len().saturating_sub(capacity);
                    queue.drain(..excess);
                    ready.notify_all();
                },
                |err| tracing::error!("Microphone stream error: {}", err),
                None,
            )
            .map_err(|e| RecorderError::AudioInput(format!("Failed to build input stream: {}", e)))?;
        stream
            .play()
            .map_err(|e| RecorderError::AudioInput(format!("Failed to start input stream: {}", e)))?;
        self.stream = Some(stream);
        tracing::info!("Microphone stream started");
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> RecorderResult<usize> {
        if self.stream.is_none() {
            return Err(RecorderError::AudioInput("input not started".into()));
        }
        let (queue, ready) = &*self.buffer;
        let mut queue = queue.lock();
        if queue.is_empty() {
            ready.wait_for(&mut queue, READ_WAIT);
        }
        // Keep 16-bit samples whole
        let n = queue.len().min(buf.len()) & !1;
        for (dst, src) in buf.iter_mut().zip(queue.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::warn!("Failed to pause microphone stream: {}", e);
            }
            tracing::info!("Microphone stream stopped");
        }
    }
}
