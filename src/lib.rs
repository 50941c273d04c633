//! Echoline - Real-Time Audio Effects Pipeline
//!
//! Audio flows through three threads:
//! 1. Capture - reads fixed-size blocks from an input device
//! 2. Process - runs each block through the effect chain
//! 3. Playback - writes processed blocks to an output device
//!
//! # Architecture
//!
//! - `dsp`: effects (reverb, delay, flanger, chorus), their building blocks
//!   and the `EffectChain`. Parameters live in atomic cells so they can be
//!   tuned from any thread while audio is running.
//! - `engine`: the device boundary and backends, the bounded block queues
//!   between stages, and the `Pipeline` that ties them together.
//! - `config`: JSON configuration for the stream and the initial chain.

pub mod cli;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;

pub use config::PipelineConfig;
pub use engine::{Pipeline, PipelineHealth};
pub use error::{EcholineError, Result};
