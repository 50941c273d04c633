//! Pipeline configuration
//!
//! Everything the pipeline needs before it starts: stream geometry, queue
//! sizing and the initial effect chain. Loaded from JSON (all fields
//! optional) and then overridden from the command line.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dsp::{ChorusControls, DelayControls, FlangerControls, RoomType};
use crate::engine::device::{SampleFormat, StreamParams};
use crate::error::{EcholineError, Result};

/// Full pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
    /// Frames per block exchanged between stages
    pub period_frames: usize,
    /// Device-side buffer in frames
    pub buffer_frames: usize,
    /// Capacity of each inter-stage queue, in blocks
    pub queue_blocks: usize,
    /// Silent blocks queued ahead of playback at start
    pub capture_prefill_blocks: usize,
    /// Silent periods written to the output device at start
    pub playback_prefill_periods: usize,
    pub effects: EffectsConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            sample_format: SampleFormat::S32,
            period_frames: 120,
            buffer_frames: 240,
            queue_blocks: 8,
            capture_prefill_blocks: 5,
            playback_prefill_periods: 2,
            effects: EffectsConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        log::debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Reject geometry the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| Err(EcholineError::InvalidConfig { reason });
        if self.sample_rate == 0 {
            return fail("sample_rate must be positive".to_string());
        }
        if self.channels == 0 {
            return fail("channels must be positive".to_string());
        }
        if self.period_frames == 0 {
            return fail("period_frames must be positive".to_string());
        }
        if self.queue_blocks < 2 {
            return fail(format!("queue_blocks must be at least 2, got {}", self.queue_blocks));
        }
        if self.capture_prefill_blocks >= self.queue_blocks {
            return fail(format!(
                "capture_prefill_blocks ({}) must be below queue_blocks ({})",
                self.capture_prefill_blocks, self.queue_blocks
            ));
        }
        Ok(())
    }

    /// Stream parameters to request from the devices
    pub fn stream_params(&self) -> StreamParams {
        StreamParams {
            sample_rate: self.sample_rate,
            channels: self.channels,
            format: self.sample_format,
            period_frames: self.period_frames,
            buffer_frames: self.buffer_frames.max(self.period_frames),
        }
    }
}

/// Initial effect chain; `None` leaves an effect out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectsConfig {
    pub flanger: Option<FlangerConfig>,
    pub chorus: Option<ChorusConfig>,
    pub delay: Option<DelayConfig>,
    pub reverb: Option<ReverbConfig>,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            flanger: None,
            chorus: None,
            delay: Some(DelayConfig::default()),
            reverb: Some(ReverbConfig::default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbConfig {
    pub room: RoomType,
    pub mix: f32,
}

impl Default for ReverbConfig {
    fn default() -> Self {
        Self {
            room: RoomType::MediumRoom,
            mix: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayConfig {
    pub time_ms: f32,
    pub feedback: f32,
    pub wet: f32,
    pub dry: f32,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            time_ms: 250.0,
            feedback: 0.3,
            wet: 0.4,
            dry: 0.6,
        }
    }
}

impl DelayConfig {
    pub fn controls(&self) -> DelayControls {
        DelayControls::new(self.time_ms, self.feedback, self.wet, self.dry)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlangerConfig {
    pub rate_hz: f32,
    pub base_delay_ms: f32,
    pub depth_ms: f32,
    pub feedback: f32,
    pub mix: f32,
}

impl Default for FlangerConfig {
    fn default() -> Self {
        Self {
            rate_hz: 0.25,
            base_delay_ms: 1.0,
            depth_ms: 2.0,
            feedback: 0.5,
            mix: 0.5,
        }
    }
}

impl FlangerConfig {
    pub fn controls(&self) -> FlangerControls {
        let controls = FlangerControls::new();
        controls.set_rate_hz(self.rate_hz);
        controls.set_base_delay_ms(self.base_delay_ms);
        controls.set_depth_ms(self.depth_ms);
        controls.set_feedback(self.feedback);
        controls.set_mix(self.mix);
        controls
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChorusConfig {
    pub voices: u8,
    pub rate_hz: f32,
    pub base_delay_ms: f32,
    pub depth_ms: f32,
    pub mix: f32,
}

impl Default for ChorusConfig {
    fn default() -> Self {
        Self {
            voices: 3,
            rate_hz: 0.8,
            base_delay_ms: 20.0,
            depth_ms: 4.0,
            mix: 0.5,
        }
    }
}

impl ChorusConfig {
    pub fn controls(&self) -> ChorusControls {
        let controls = ChorusControls::new(self.voices);
        controls.set_rate_hz(self.rate_hz);
        controls.set_base_delay_ms(self.base_delay_ms);
        controls.set_depth_ms(self.depth_ms);
        controls.set_mix(self.mix);
        controls
    }
}
