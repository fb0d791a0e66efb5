//! Stream Parameters
//!
//! Host-specified layout for a playback or capture stream. The sample
//! format is fixed at signed 16-bit little-endian PCM; rate, channel count
//! and the target buffer depth are up to the caller.

use serde::{Deserialize, Serialize};

use sonance_transport::{BufferAttrs, SampleSpec};

/// Parameters for creating a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamParams {
    /// Sample rate in Hz (e.g., 44100, 48000)
    pub sample_rate: u32,

    /// Number of interleaved channels (1 = mono, 2 = stereo)
    pub channels: u8,

    /// Target server-side buffer depth in frames (lower = less latency)
    pub target_buffer_frames: u32,
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            target_buffer_frames: 1024,
        }
    }
}

impl StreamParams {
    pub fn new(sample_rate: u32, channels: u8, target_buffer_frames: u32) -> Self {
        Self {
            sample_rate,
            channels,
            target_buffer_frames,
        }
    }

    /// The transport-level sample spec (format is implied S16LE)
    pub fn sample_spec(&self) -> SampleSpec {
        SampleSpec {
            rate: self.sample_rate,
            channels: self.channels,
        }
    }

    /// Bytes per frame (one S16LE sample per channel)
    pub fn frame_bytes(&self) -> usize {
        self.sample_spec().frame_bytes()
    }

    /// Target buffer depth in bytes
    pub fn target_bytes(&self) -> u32 {
        self.target_buffer_frames * self.frame_bytes() as u32
    }

    /// Buffer latency in milliseconds for this configuration
    pub fn latency_ms(&self) -> f32 {
        (self.target_buffer_frames as f32 / self.sample_rate as f32) * 1000.0
    }

    /// Buffering hints for a playback connect
    pub fn playback_attrs(&self) -> BufferAttrs {
        BufferAttrs {
            tlength: Some(self.target_bytes()),
            prebuf: Some(self.target_bytes()),
            ..BufferAttrs::default()
        }
    }

    /// Buffering hints for a record connect (fragment size also pinned)
    pub fn capture_attrs(&self) -> BufferAttrs {
        BufferAttrs {
            fragsize: Some(self.target_bytes()),
            tlength: Some(self.target_bytes()),
            prebuf: Some(self.target_bytes()),
            ..BufferAttrs::default()
        }
    }

    /// Validate parameter ranges
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate < 8000 || self.sample_rate > 192_000 {
            return Err(format!("Invalid sample rate: {}", self.sample_rate));
        }
        if self.channels == 0 || self.channels > 8 {
            return Err(format!("Invalid channel count: {}", self.channels));
        }
        if self.target_buffer_frames < 32 || self.target_buffer_frames > 1_048_576 {
            return Err(format!(
                "Invalid target buffer: {} frames",
                self.target_buffer_frames
            ));
        }
        Ok(())
    }
}
