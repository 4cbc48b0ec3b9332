//! Duplex device streams through CPAL
//!
//! The default input device feeds a [`LockFreeRingBuffer`]; the output
//! callback owns the [`EngineDriver`], pulls captured samples from the
//! buffer and writes the processed block to the default output device.
//! Without an input device the engine keeps running on silence.

use std::fmt;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig as CpalStreamConfig};
use tracing::{debug, error, info, warn};
use timbre_core::domain::{AudioError, EngineConfig};

use super::{EngineDriver, LockFreeRingBuffer};

type Result<T> = std::result::Result<T, AudioError>;

/// Capture headroom in blocks
const RING_BLOCKS: usize = 8;

/// Largest callback buffer handled in one pass, in frames
const MAX_CALLBACK_FRAMES: usize = 8192;

/// Running duplex stream
pub struct RealtimeEngine {
    _input: Option<Stream>,
    _output: Stream,
    input_device: Option<String>,
    output_device: String,
    degradations: Vec<String>,
}

impl RealtimeEngine {
    /// Open the default devices and start processing through `driver`
    ///
    /// # Errors
    /// `DeviceNotFound` without an output device, `StreamError` when the
    /// output stream cannot be built or started.
    pub fn start(config: &EngineConfig, mut driver: EngineDriver) -> Result<Self> {
        let host = cpal::default_host();
        debug!("Using audio host: {:?}", host.id());

        let channels = config.channels.count() as usize;
        let cpal_config = CpalStreamConfig {
            channels: config.channels.count(),
            sample_rate: config.sample_rate.hz(),
            buffer_size: cpal::BufferSize::Default,
        };

        let output_device = host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))?;
        let output_name = device_name(&output_device);

        let ring = Arc::new(LockFreeRingBuffer::with_capacity(
            config.max_block_size * channels * RING_BLOCKS,
        ));
        let mut degradations = Vec::new();

        let (input, input_name) = match host.default_input_device() {
            Some(device) => {
                let name = device_name(&device);
                match build_input(&device, &cpal_config, Arc::clone(&ring)) {
                    Ok(stream) => (Some(stream), Some(name)),
                    Err(e) => {
                        degradations.push(format!("input '{}' unavailable: {}", name, e));
                        (None, None)
                    }
                }
            }
            None => {
                degradations.push("no input device, processing silence".to_string());
                (None, None)
            }
        };
        for degradation in &degradations {
            warn!("Capture degraded: {}", degradation);
        }

        let mut captured = vec![0.0_f32; MAX_CALLBACK_FRAMES * channels];
        let output_ring = Arc::clone(&ring);
        let output = output_device
            .build_output_stream(
                &cpal_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for out in data.chunks_mut(captured.len()) {
                        let input = &mut captured[..out.len()];
                        let got = output_ring.read_frames(input, channels);
                        input[got..].fill(0.0);
                        if driver.process_interleaved(input, out).is_err() {
                            out.fill(0.0);
                        }
                    }
                },
                |err| error!("Output stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::StreamError(format!("Failed to build stream: {}", e)))?;

        output
            .play()
            .map_err(|e| AudioError::StreamError(format!("Failed to start stream: {}", e)))?;

        info!(
            input = input_name.as_deref().unwrap_or("<silence>"),
            output = %output_name,
            sample_rate = config.sample_rate.hz(),
            channels,
            "Real-time engine started"
        );

        Ok(Self {
            _input: input,
            _output: output,
            input_device: input_name,
            output_device: output_name,
            degradations,
        })
    }

    /// Name of the capture device, `None` when running on silence
    pub fn input_device(&self) -> Option<&str> {
        self.input_device.as_deref()
    }

    pub fn output_device(&self) -> &str {
        &self.output_device
    }

    /// Capabilities lost while opening the devices
    pub fn degradations(&self) -> &[String] {
        &self.degradations
    }
}

impl fmt::Debug for RealtimeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeEngine")
            .field("input_device", &self.input_device)
            .field("output_device", &self.output_device)
            .field("degradations", &self.degradations)
            .finish()
    }
}

impl Drop for RealtimeEngine {
    fn drop(&mut self) {
        info!("Stopping real-time engine");
    }
}

fn build_input(
    device: &cpal::Device,
    config: &CpalStreamConfig,
    ring: Arc<LockFreeRingBuffer>,
) -> Result<Stream> {
    let channels = config.channels as usize;
    let stream = device
        .build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // overflow drops the newest frames
                ring.write_frames(data, channels);
            },
            |err| error!("Input stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::StreamError(format!("Failed to build stream: {}", e)))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamError(format!("Failed to start stream: {}", e)))?;
    Ok(stream)
}

fn device_name(device: &cpal::Device) -> String {
    #[allow(deprecated)]
    let name = device
        .name()
        .unwrap_or_else(|_| "Unknown Device".to_string());
    name
}

/// Names of the host's input and output devices
pub fn list_devices() -> Result<(Vec<String>, Vec<String>)> {
    let host = cpal::default_host();
    let inputs = host
        .input_devices()
        .map_err(|e| AudioError::StreamError(e.to_string()))?
        .map(|d| device_name(&d))
        .collect();
    let outputs = host
        .output_devices()
        .map_err(|e| AudioError::StreamError(e.to_string()))?
        .map(|d| device_name(&d))
        .collect();
    Ok((inputs, outputs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices() {
        match list_devices() {
            Ok((inputs, outputs)) => {
                for name in inputs.iter().chain(outputs.iter()) {
                    assert!(!name.is_empty());
                }
            }
            Err(e) => {
                // On CI or headless systems, there might not be audio devices
                eprintln!("Skipping test: {}", e);
            }
        }
    }
}
