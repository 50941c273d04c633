//! CLI Module
//!
//! Command-line arguments for the echoline binary. Device identifiers and
//! stream overrides come from the command line; everything else can come
//! from a JSON configuration file.

pub mod commands;

use clap::Parser;
use std::path::PathBuf;

use crate::config::{ChorusConfig, FlangerConfig, PipelineConfig};
use crate::error::Result;

/// Echoline - real-time audio effects pipeline
#[derive(Parser, Debug)]
#[command(name = "echoline")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Capture device: `default`, a sound card name, `null`, or a .wav file
    #[arg(default_value = "default")]
    pub capture: String,

    /// Playback device: `default`, a sound card name, `null`, or a .wav file
    #[arg(default_value = "default")]
    pub playback: String,

    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Sample rate in Hz
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Channel count
    #[arg(long)]
    pub channels: Option<u16>,

    /// Frames per block
    #[arg(long)]
    pub period_frames: Option<usize>,

    /// Device buffer size in frames
    #[arg(long)]
    pub buffer_frames: Option<usize>,

    /// Leave the reverb out of the chain
    #[arg(long)]
    pub no_reverb: bool,

    /// Leave the delay out of the chain
    #[arg(long)]
    pub no_delay: bool,

    /// Add a flanger to the chain
    #[arg(long)]
    pub flanger: bool,

    /// Add a chorus to the chain
    #[arg(long)]
    pub chorus: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Configuration file (or defaults) with the command-line overrides applied
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(rate) = self.sample_rate {
            config.sample_rate = rate;
        }
        if let Some(channels) = self.channels {
            config.channels = channels;
        }
        if let Some(frames) = self.period_frames {
            config.period_frames = frames;
        }
        if let Some(frames) = self.buffer_frames {
            config.buffer_frames = frames;
        }

        if self.no_reverb {
            config.effects.reverb = None;
        }
        if self.no_delay {
            config.effects.delay = None;
        }
        if self.flanger && config.effects.flanger.is_none() {
            config.effects.flanger = Some(FlangerConfig::default());
        }
        if self.chorus && config.effects.chorus.is_none() {
            config.effects.chorus = Some(ChorusConfig::default());
        }

        config.validate()?;
        Ok(config)
    }
}
