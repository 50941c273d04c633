//! Flanger effect
//!
//! Single LFO-swept short delay with feedback. Each channel has its own
//! delay line; the LFO is shared so the sweep stays in phase across
//! channels.

use std::f32::consts::TAU;
use std::sync::Arc;

use serde_json::{json, Value};

use super::delay_line::FractionalDelayLine;
use super::effect::{new_effect_id, passthrough, ControlledEffect, Effect, EffectControls, DEFAULT_SAMPLE_RATE};
use super::param::{json_bool, CommonControls, FloatParam};
use super::sample::{to_fixed, to_float};
use crate::error::{EcholineError, Result};
use crate::impl_effect_common;

/// Longest sweep the lines must hold: max base plus twice max depth
const MAX_SWEEP_MS: f32 = 10.0 + 2.0 * 10.0;

/// Shared flanger parameters
#[derive(Debug)]
pub struct FlangerControls {
    common: CommonControls,
    rate_hz: FloatParam,
    base_delay_ms: FloatParam,
    depth_ms: FloatParam,
    feedback: FloatParam,
    mix: FloatParam,
}

impl FlangerControls {
    pub fn new() -> Self {
        Self {
            common: CommonControls::new(),
            rate_hz: FloatParam::new(0.25, 0.05, 5.0),
            base_delay_ms: FloatParam::new(1.0, 0.1, 10.0),
            depth_ms: FloatParam::new(2.0, 0.0, 10.0),
            feedback: FloatParam::new(0.5, 0.0, 0.95),
            mix: FloatParam::new(0.5, 0.0, 1.0),
        }
    }

    /// LFO rate in Hz (0.05-5)
    pub fn set_rate_hz(&self, rate: f32) -> f32 {
        self.rate_hz.set(rate)
    }

    pub fn rate_hz(&self) -> f32 {
        self.rate_hz.get()
    }

    /// Minimum delay in ms (0.1-10)
    pub fn set_base_delay_ms(&self, ms: f32) -> f32 {
        self.base_delay_ms.set(ms)
    }

    pub fn base_delay_ms(&self) -> f32 {
        self.base_delay_ms.get()
    }

    /// Sweep depth in ms (0-10)
    pub fn set_depth_ms(&self, ms: f32) -> f32 {
        self.depth_ms.set(ms)
    }

    pub fn depth_ms(&self) -> f32 {
        self.depth_ms.get()
    }

    /// Feedback (0-0.95)
    pub fn set_feedback(&self, feedback: f32) -> f32 {
        self.feedback.set(feedback)
    }

    pub fn feedback(&self) -> f32 {
        self.feedback.get()
    }

    /// Wet/dry mix (0-1)
    pub fn set_mix(&self, mix: f32) -> f32 {
        self.mix.set(mix)
    }

    pub fn mix(&self) -> f32 {
        self.mix.get()
    }
}

impl Default for FlangerControls {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectControls for FlangerControls {
    fn common(&self) -> &CommonControls {
        &self.common
    }

    fn effect_type(&self) -> &'static str {
        "flanger"
    }

    fn get_params(&self) -> Value {
        json!({
            "enabled": self.is_enabled(),
            "rate_hz": self.rate_hz(),
            "base_delay_ms": self.base_delay_ms(),
            "depth_ms": self.depth_ms(),
            "feedback": self.feedback(),
            "mix": self.mix(),
        })
    }

    fn set_param(&self, name: &str, value: &Value) -> Result<()> {
        match name {
            "enabled" => {
                self.set_enabled(json_bool(name, value)?);
                Ok(())
            }
            "rate_hz" => self.rate_hz.set_json(name, value),
            "base_delay_ms" => self.base_delay_ms.set_json(name, value),
            "depth_ms" => self.depth_ms.set_json(name, value),
            "feedback" => self.feedback.set_json(name, value),
            "mix" => self.mix.set_json(name, value),
            _ => Err(EcholineError::UnknownParameter {
                effect: "flanger".to_string(),
                param: name.to_string(),
            }),
        }
    }
}

/// LFO-modulated short delay with feedback
#[derive(Debug)]
pub struct Flanger {
    id: String,
    sample_rate: u32,
    controls: Arc<FlangerControls>,
    lines: Vec<FractionalDelayLine>,
    /// LFO phase in radians, kept in [0, 2π)
    phase: f32,
}

impl Flanger {
    pub fn new() -> Self {
        Self::with_controls(FlangerControls::new())
    }

    pub fn with_controls(controls: FlangerControls) -> Self {
        Self {
            id: new_effect_id("flanger"),
            sample_rate: DEFAULT_SAMPLE_RATE,
            controls: Arc::new(controls),
            lines: Vec::new(),
            phase: 0.0,
        }
    }

    /// Shared parameters
    pub fn params(&self) -> &FlangerControls {
        &self.controls
    }

    /// Current LFO phase in radians
    pub fn phase(&self) -> f32 {
        self.phase
    }

    fn line_capacity(&self) -> usize {
        (MAX_SWEEP_MS * self.sample_rate as f32 / 1000.0).ceil() as usize + 2
    }

    fn ensure_lines(&mut self, channels: usize) {
        let capacity = self.line_capacity();
        let fits = self.lines.len() == channels
            && self.lines.first().map_or(true, |l| l.capacity() == capacity);
        if !fits {
            self.lines = (0..channels)
                .map(|_| FractionalDelayLine::new(capacity))
                .collect();
        }
    }
}

impl Default for Flanger {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for Flanger {
    impl_effect_common!("flanger", "Flanger");

    fn process(&mut self, input: &[i32], output: &mut [i32], channels: usize) {
        if !self.is_enabled() || channels == 0 {
            passthrough(input, output);
            return;
        }
        self.ensure_lines(channels);

        let sr = self.sample_rate as f32;
        let c = &self.controls;
        let base = c.base_delay_ms();
        let depth = c.depth_ms();
        let feedback = c.feedback();
        let mix = c.mix();
        let phase_inc = TAU * c.rate_hz() / sr;
        let frames = input.len().min(output.len()) / channels;

        for frame in 0..frames {
            let delay = (base + (self.phase.sin() + 1.0) * depth) * sr / 1000.0;
            for (ch, line) in self.lines.iter_mut().enumerate() {
                let idx = frame * channels + ch;
                let x = to_float(input[idx]);
                // Read before write: offset 0 is already one frame back
                let delayed = line.read_interpolated(delay - 1.0);
                line.write(x + delayed * feedback);
                output[idx] = to_fixed(x * (1.0 - mix) + delayed * mix);
            }
            self.phase += phase_inc;
            if self.phase >= TAU {
                self.phase -= TAU;
            }
        }
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate > 0 {
            self.sample_rate = sample_rate;
        }
    }

    fn reset(&mut self) {
        self.lines.iter_mut().for_each(FractionalDelayLine::clear);
        self.phase = 0.0;
    }
}

impl ControlledEffect for Flanger {
    type Controls = FlangerControls;

    fn typed_controls(&self) -> Arc<FlangerControls> {
        Arc::clone(&self.controls)
    }
}
