//! DSP Effects Library
//!
//! Time-based effects over interleaved fixed-point blocks.
//! All effects implement the `Effect` trait for uniform processing and
//! expose their parameters through shared, lock-free controls.

mod chain;
mod chorus;
mod delay;
pub mod delay_line;
pub mod effect;
pub mod filters;
mod flanger;
pub mod param;
mod reverb;
pub mod sample;

pub use chain::EffectChain;
pub use chorus::{Chorus, ChorusControls, MAX_VOICES, MIN_VOICES};
pub use delay::{Delay, DelayControls};
pub use delay_line::FractionalDelayLine;
pub use effect::{ControlledEffect, Effect, EffectControls, EffectHandle};
pub use filters::{AllPassFilter, CombFilter, EarlyReflections};
pub use flanger::{Flanger, FlangerControls};
pub use param::{CommonControls, FloatParam};
pub use reverb::{Reverb, ReverbControls, RoomPreset, RoomType};
