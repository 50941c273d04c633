//! Audio device boundary
//!
//! The pipeline talks to sound hardware (or stand-ins for it) only through
//! the `AudioDevice` trait. A device is owned by exactly one stage thread at
//! a time.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which way samples flow through a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Capture,
    Playback,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Capture => f.write_str("capture"),
            Direction::Playback => f.write_str("playback"),
        }
    }
}

/// Hardware sample encoding (blocks are always `i32` at the boundary)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    S16,
    #[default]
    S32,
    F32,
}

/// Stream parameters requested from, and negotiated by, a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    /// Frames per I/O call
    pub period_frames: usize,
    /// Device-side buffer in frames
    pub buffer_frames: usize,
}

impl StreamParams {
    /// Interleaved samples in one period
    pub fn period_samples(&self) -> usize {
        self.period_frames * self.channels as usize
    }

    /// Wall-clock length of one period
    pub fn period_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.period_frames as f64 / self.sample_rate.max(1) as f64)
    }
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            format: SampleFormat::S32,
            period_frames: 120,
            buffer_frames: 240,
        }
    }
}

/// Device lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Open,
    Prepared,
    Running,
    Xrun,
    Disconnected,
    Closed,
}

impl DeviceState {
    const ALL: [DeviceState; 6] = [
        DeviceState::Open,
        DeviceState::Prepared,
        DeviceState::Running,
        DeviceState::Xrun,
        DeviceState::Disconnected,
        DeviceState::Closed,
    ];

    fn index(self) -> u8 {
        Self::ALL.iter().position(|s| *s == self).unwrap_or(0) as u8
    }

    fn from_index(index: u8) -> Self {
        Self::ALL
            .get(index as usize)
            .copied()
            .unwrap_or(DeviceState::Closed)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceState::Open => "open",
            DeviceState::Prepared => "prepared",
            DeviceState::Running => "running",
            DeviceState::Xrun => "xrun",
            DeviceState::Disconnected => "disconnected",
            DeviceState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Device state published for readers on other threads
#[derive(Debug)]
pub struct SharedDeviceState(AtomicU8);

impl SharedDeviceState {
    pub fn new(state: DeviceState) -> Self {
        Self(AtomicU8::new(state.index()))
    }

    pub fn load(&self) -> DeviceState {
        DeviceState::from_index(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: DeviceState) {
        self.0.store(state.index(), Ordering::Release);
    }
}

/// Device-level failures
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device not ready, try again")]
    WouldBlock,

    #[error("buffer overrun/underrun")]
    Xrun,

    #[error("device suspended")]
    Suspended,

    #[error("device disconnected")]
    Disconnected,

    #[error("end of stream")]
    EndOfStream,

    #[error("no such device: {name}")]
    NotFound { name: String },

    #[error("unsupported: {reason}")]
    Unsupported { reason: String },

    #[error("invalid stream configuration: {reason}")]
    Config { reason: String },

    #[error("operation not valid while device is {state}")]
    InvalidState { state: DeviceState },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("backend error: {reason}")]
    Backend { reason: String },
}

impl DeviceError {
    /// Errors a stage may try to recover from in place
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DeviceError::Xrun | DeviceError::Suspended | DeviceError::WouldBlock
        )
    }
}

/// Result type alias for device operations
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// A capture or playback endpoint
///
/// Blocks are interleaved `i32`; `frames * channels` samples per call.
pub trait AudioDevice: Send {
    /// Identifier the device was opened with
    fn name(&self) -> &str;

    fn direction(&self) -> Direction;

    /// False for sources that can wait for the pipeline (files); the
    /// pipeline then applies back-pressure instead of dropping blocks
    fn is_live(&self) -> bool {
        true
    }

    /// Request stream parameters; returns what the device actually uses
    fn configure(&mut self, requested: &StreamParams) -> DeviceResult<StreamParams>;

    /// Ready the device for `start`
    fn prepare(&mut self) -> DeviceResult<()>;

    /// Begin streaming (no-op when already running)
    fn start(&mut self) -> DeviceResult<()>;

    /// Fill `buf` with up to `frames` frames; returns frames read
    fn read(&mut self, buf: &mut [i32], frames: usize) -> DeviceResult<usize> {
        let _ = (buf, frames);
        Err(DeviceError::Unsupported {
            reason: format!("{} is not a capture device", self.name()),
        })
    }

    /// Send `frames` frames from `buf`; returns frames written
    fn write(&mut self, buf: &[i32], frames: usize) -> DeviceResult<usize> {
        let _ = (buf, frames);
        Err(DeviceError::Unsupported {
            reason: format!("{} is not a playback device", self.name()),
        })
    }

    /// Bring the device back after a transient error and re-prepare it
    fn recover(&mut self, error: &DeviceError) -> DeviceResult<()>;

    fn state(&self) -> DeviceState;

    /// Stop streaming, dropping pending frames
    fn stop(&mut self) -> DeviceResult<()>;

    /// Release the device (no-op when already closed)
    fn close(&mut self) -> DeviceResult<()>;
}

impl fmt::Debug for dyn AudioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioDevice")
            .field("name", &self.name())
            .field("direction", &self.direction())
            .field("state", &self.state())
            .finish()
    }
}
