//! Chorus effect
//!
//! Several detuned copies of the signal, each read from its own modulated
//! delay line. Voices start evenly spread around the LFO cycle and run at
//! slightly different rates so they never lock together.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use super::delay_line::FractionalDelayLine;
use super::effect::{new_effect_id, passthrough, ControlledEffect, Effect, EffectControls, DEFAULT_SAMPLE_RATE};
use super::param::{json_bool, CommonControls, FloatParam};
use super::sample::{to_fixed, to_float};
use crate::error::{EcholineError, Result};
use crate::impl_effect_common;

pub const MIN_VOICES: u8 = 1;
pub const MAX_VOICES: u8 = 8;

/// Rate spread between neighbouring voices
const VOICE_RATE_SPREAD: f32 = 0.15;

/// Longest delay a voice can reach: max base plus twice max depth
const MAX_SWEEP_MS: f32 = 40.0 + 2.0 * 10.0;

/// Shared chorus parameters
#[derive(Debug)]
pub struct ChorusControls {
    common: CommonControls,
    voices: AtomicU8,
    rate_hz: FloatParam,
    base_delay_ms: FloatParam,
    depth_ms: FloatParam,
    mix: FloatParam,
}

impl ChorusControls {
    pub fn new(voices: u8) -> Self {
        Self {
            common: CommonControls::new(),
            voices: AtomicU8::new(voices.clamp(MIN_VOICES, MAX_VOICES)),
            rate_hz: FloatParam::new(0.8, 0.05, 5.0),
            base_delay_ms: FloatParam::new(20.0, 5.0, 40.0),
            depth_ms: FloatParam::new(4.0, 0.0, 10.0),
            mix: FloatParam::new(0.5, 0.0, 1.0),
        }
    }

    /// Number of voices (1-8); the voices are rebuilt before the next block
    pub fn set_voices(&self, voices: u8) -> u8 {
        let voices = voices.clamp(MIN_VOICES, MAX_VOICES);
        self.voices.store(voices, Ordering::Relaxed);
        voices
    }

    pub fn voices(&self) -> u8 {
        self.voices.load(Ordering::Relaxed)
    }

    /// Base LFO rate in Hz (0.05-5)
    pub fn set_rate_hz(&self, rate: f32) -> f32 {
        self.rate_hz.set(rate)
    }

    pub fn rate_hz(&self) -> f32 {
        self.rate_hz.get()
    }

    /// Center delay in ms (5-40)
    pub fn set_base_delay_ms(&self, ms: f32) -> f32 {
        self.base_delay_ms.set(ms)
    }

    pub fn base_delay_ms(&self) -> f32 {
        self.base_delay_ms.get()
    }

    /// Modulation depth in ms (0-10)
    pub fn set_depth_ms(&self, ms: f32) -> f32 {
        self.depth_ms.set(ms)
    }

    pub fn depth_ms(&self) -> f32 {
        self.depth_ms.get()
    }

    /// Wet/dry mix (0-1)
    pub fn set_mix(&self, mix: f32) -> f32 {
        self.mix.set(mix)
    }

    pub fn mix(&self) -> f32 {
        self.mix.get()
    }
}

impl Default for ChorusControls {
    fn default() -> Self {
        Self::new(3)
    }
}

impl EffectControls for ChorusControls {
    fn common(&self) -> &CommonControls {
        &self.common
    }

    fn effect_type(&self) -> &'static str {
        "chorus"
    }

    fn get_params(&self) -> Value {
        json!({
            "enabled": self.is_enabled(),
            "voices": self.voices(),
            "rate_hz": self.rate_hz(),
            "base_delay_ms": self.base_delay_ms(),
            "depth_ms": self.depth_ms(),
            "mix": self.mix(),
        })
    }

    fn set_param(&self, name: &str, value: &Value) -> Result<()> {
        match name {
            "enabled" => {
                self.set_enabled(json_bool(name, value)?);
                Ok(())
            }
            "voices" => {
                let voices = value
                    .as_f64()
                    .ok_or_else(|| EcholineError::InvalidParameter {
                        param: name.to_string(),
                        value: value.to_string(),
                        expected: format!("a voice count in {} to {}", MIN_VOICES, MAX_VOICES),
                    })?;
                self.set_voices(voices.round().clamp(0.0, u8::MAX as f64) as u8);
                Ok(())
            }
            "rate_hz" => self.rate_hz.set_json(name, value),
            "base_delay_ms" => self.base_delay_ms.set_json(name, value),
            "depth_ms" => self.depth_ms.set_json(name, value),
            "mix" => self.mix.set_json(name, value),
            _ => Err(EcholineError::UnknownParameter {
                effect: "chorus".to_string(),
                param: name.to_string(),
            }),
        }
    }
}

/// One chorus voice: its own LFO and one delay line per channel
#[derive(Debug, Clone)]
struct Voice {
    phase: f32,
    rate_scale: f32,
    lines: Vec<FractionalDelayLine>,
}

/// Multi-voice chorus
#[derive(Debug)]
pub struct Chorus {
    id: String,
    sample_rate: u32,
    controls: Arc<ChorusControls>,
    voices: Vec<Voice>,
    /// (voices, channels, sample rate) the voices were built for
    built_for: (u8, usize, u32),
}

impl Chorus {
    pub fn new(voices: u8) -> Self {
        Self::with_controls(ChorusControls::new(voices))
    }

    pub fn with_controls(controls: ChorusControls) -> Self {
        Self {
            id: new_effect_id("chorus"),
            sample_rate: DEFAULT_SAMPLE_RATE,
            controls: Arc::new(controls),
            voices: Vec::new(),
            built_for: (0, 0, 0),
        }
    }

    /// Shared parameters
    pub fn params(&self) -> &ChorusControls {
        &self.controls
    }

    /// Number of voices currently built
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// LFO phase of each built voice
    pub fn voice_phases(&self) -> Vec<f32> {
        self.voices.iter().map(|v| v.phase).collect()
    }

    fn rebuild(&mut self, voices: u8, channels: usize) {
        let capacity = (MAX_SWEEP_MS * self.sample_rate as f32 / 1000.0).ceil() as usize + 2;
        let n = voices as usize;
        self.voices = (0..n)
            .map(|i| Voice {
                phase: i as f32 * TAU / n as f32,
                rate_scale: 1.0 + VOICE_RATE_SPREAD * i as f32,
                lines: (0..channels)
                    .map(|_| FractionalDelayLine::new(capacity))
                    .collect(),
            })
            .collect();
        self.built_for = (voices, channels, self.sample_rate);
        log::debug!("chorus {}: built {} voice(s)", self.id, n);
    }
}

impl Default for Chorus {
    fn default() -> Self {
        Self::with_controls(ChorusControls::default())
    }
}

impl Effect for Chorus {
    impl_effect_common!("chorus", "Chorus");

    fn process(&mut self, input: &[i32], output: &mut [i32], channels: usize) {
        if !self.is_enabled() || channels == 0 {
            passthrough(input, output);
            return;
        }
        let voices = self.controls.voices();
        if self.built_for != (voices, channels, self.sample_rate) {
            self.rebuild(voices, channels);
        }

        let sr = self.sample_rate as f32;
        let c = &self.controls;
        let base = c.base_delay_ms();
        let depth = c.depth_ms();
        let mix = c.mix();
        let phase_inc = TAU * c.rate_hz() / sr;
        let voice_gain = 1.0 / self.voices.len() as f32;
        let frames = input.len().min(output.len()) / channels;

        for frame in 0..frames {
            let base_idx = frame * channels;
            for ch in 0..channels {
                let x = to_float(input[base_idx + ch]);
                let mut wet = 0.0;
                for voice in &mut self.voices {
                    let delay = (base + (voice.phase.sin() + 1.0) * depth) * sr / 1000.0;
                    let line = &mut voice.lines[ch];
                    line.write(x);
                    wet += line.read_interpolated(delay);
                }
                output[base_idx + ch] = to_fixed(x * (1.0 - mix) + wet * voice_gain * mix);
            }
            for voice in &mut self.voices {
                voice.phase += phase_inc * voice.rate_scale;
                if voice.phase >= TAU {
                    voice.phase -= TAU;
                }
            }
        }
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate > 0 {
            self.sample_rate = sample_rate;
        }
    }

    fn reset(&mut self) {
        // Rebuilding restores the initial phase spread and silent lines
        self.built_for = (0, 0, 0);
        self.voices.clear();
    }
}

impl ControlledEffect for Chorus {
    type Controls = ChorusControls;

    fn typed_controls(&self) -> Arc<ChorusControls> {
        Arc::clone(&self.controls)
    }
}
