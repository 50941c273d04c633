//! Audio Engine Module
//!
//! Everything around the effect chain:
//! - Device boundary and backends (null, WAV, memory, sound cards)
//! - Bounded block queues between stages
//! - The three-stage pipeline and its counters

pub mod backend;
pub mod device;
pub mod pipeline;
pub mod queue;
pub mod stats;

pub use backend::{open_device, DeviceSpec, MemoryCapture, MemoryPlayback, NullDevice, SharedSink, WavCapture, WavPlayback};
pub use device::{
    AudioDevice, DeviceError, DeviceResult, DeviceState, Direction, SampleFormat, StreamParams,
};
pub use pipeline::{Pipeline, PipelineHealth, PipelineStatus, QueueFill, StageStatus};
pub use queue::{BoundedBlockQueue, IoMode, QueueError};
pub use stats::{PipelineStats, StageState, StatsSnapshot};
