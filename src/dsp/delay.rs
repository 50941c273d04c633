//! Delay Effect
//!
//! Feedback echo working directly on fixed-point samples. Accumulation is
//! done in 64 bits and saturated, so hot input plus feedback clips instead
//! of wrapping around.

use std::sync::Arc;

use serde_json::{json, Value};

use super::effect::{new_effect_id, passthrough, ControlledEffect, Effect, EffectControls, DEFAULT_SAMPLE_RATE};
use super::param::{json_bool, CommonControls, FloatParam};
use super::sample::saturate;
use crate::error::{EcholineError, Result};
use crate::impl_effect_common;

/// Extra ring slots beyond the delay length
const BUFFER_HEADROOM: usize = 1024;

/// Shared delay parameters
#[derive(Debug)]
pub struct DelayControls {
    common: CommonControls,
    /// Delay time in milliseconds (1-2000)
    time_ms: FloatParam,
    /// Feedback amount (0-0.95, never 1.0)
    feedback: FloatParam,
    /// Wet signal level (0-1)
    wet: FloatParam,
    /// Dry signal level (0-1)
    dry: FloatParam,
}

impl DelayControls {
    pub fn new(time_ms: f32, feedback: f32, wet: f32, dry: f32) -> Self {
        Self {
            common: CommonControls::new(),
            time_ms: FloatParam::new(time_ms, 1.0, 2000.0),
            feedback: FloatParam::new(feedback, 0.0, 0.95),
            wet: FloatParam::new(wet, 0.0, 1.0),
            dry: FloatParam::new(dry, 0.0, 1.0),
        }
    }

    /// Set delay time in milliseconds (clamped to 1-2000)
    ///
    /// The ring buffers are resized by the processing thread before its
    /// next block.
    pub fn set_time_ms(&self, ms: f32) -> f32 {
        self.time_ms.set(ms)
    }

    pub fn time_ms(&self) -> f32 {
        self.time_ms.get()
    }

    /// Set feedback (clamped to 0-0.95)
    pub fn set_feedback(&self, feedback: f32) -> f32 {
        self.feedback.set(feedback)
    }

    pub fn feedback(&self) -> f32 {
        self.feedback.get()
    }

    /// Set wet and dry levels together (each clamped to 0-1)
    pub fn set_mix(&self, wet: f32, dry: f32) -> (f32, f32) {
        (self.wet.set(wet), self.dry.set(dry))
    }

    pub fn set_wet(&self, wet: f32) -> f32 {
        self.wet.set(wet)
    }

    pub fn wet(&self) -> f32 {
        self.wet.get()
    }

    pub fn set_dry(&self, dry: f32) -> f32 {
        self.dry.set(dry)
    }

    pub fn dry(&self) -> f32 {
        self.dry.get()
    }
}

impl Default for DelayControls {
    fn default() -> Self {
        Self::new(250.0, 0.3, 0.3, 0.7)
    }
}

impl EffectControls for DelayControls {
    fn common(&self) -> &CommonControls {
        &self.common
    }

    fn effect_type(&self) -> &'static str {
        "delay"
    }

    fn get_params(&self) -> Value {
        json!({
            "enabled": self.is_enabled(),
            "time_ms": self.time_ms(),
            "feedback": self.feedback(),
            "wet": self.wet(),
            "dry": self.dry(),
        })
    }

    fn set_param(&self, name: &str, value: &Value) -> Result<()> {
        match name {
            "enabled" => {
                self.set_enabled(json_bool(name, value)?);
                Ok(())
            }
            "time_ms" => self.time_ms.set_json(name, value),
            "feedback" => self.feedback.set_json(name, value),
            "wet" => self.wet.set_json(name, value),
            "dry" => self.dry.set_json(name, value),
            _ => Err(EcholineError::UnknownParameter {
                effect: "delay".to_string(),
                param: name.to_string(),
            }),
        }
    }
}

/// Feedback delay on fixed-point samples
#[derive(Debug)]
pub struct Delay {
    id: String,
    sample_rate: u32,
    controls: Arc<DelayControls>,
    /// One ring per channel, all `delay_samples + BUFFER_HEADROOM` long
    rings: Vec<Vec<i32>>,
    write_pos: usize,
    /// Delay length the rings were built for
    delay_samples: usize,
}

impl Delay {
    /// Create a delay with default feedback and mix
    ///
    /// # Arguments
    /// * `time_ms` - Delay time in milliseconds (clamped to 1-2000)
    pub fn new(time_ms: f32) -> Self {
        let controls = DelayControls::default();
        controls.set_time_ms(time_ms);
        Self::with_controls(controls)
    }

    /// Create a delay from a full parameter set
    pub fn with_controls(controls: DelayControls) -> Self {
        Self {
            id: new_effect_id("delay"),
            sample_rate: DEFAULT_SAMPLE_RATE,
            controls: Arc::new(controls),
            rings: Vec::new(),
            write_pos: 0,
            delay_samples: 0,
        }
    }

    /// Shared parameters
    pub fn params(&self) -> &DelayControls {
        &self.controls
    }

    /// Delay length in samples for the current time and sample rate
    pub fn delay_samples(&self) -> usize {
        let samples = self.controls.time_ms() as f64 * self.sample_rate as f64 / 1000.0;
        (samples.round() as usize).max(1)
    }

    /// Recreate the rings when the delay length or channel count changed
    fn ensure_buffers(&mut self, channels: usize) {
        let delay_samples = self.delay_samples();
        if delay_samples == self.delay_samples && self.rings.len() == channels {
            return;
        }
        let len = delay_samples + BUFFER_HEADROOM;
        self.rings = vec![vec![0; len]; channels];
        self.write_pos = 0;
        self.delay_samples = delay_samples;
        log::debug!(
            "delay {}: {} channel ring(s) of {} samples",
            self.id,
            channels,
            len
        );
    }
}

impl Default for Delay {
    fn default() -> Self {
        Self::with_controls(DelayControls::default())
    }
}

impl Effect for Delay {
    impl_effect_common!("delay", "Delay");

    fn process(&mut self, input: &[i32], output: &mut [i32], channels: usize) {
        if !self.is_enabled() || channels == 0 {
            passthrough(input, output);
            return;
        }
        self.ensure_buffers(channels);

        let feedback = self.controls.feedback() as f64;
        let wet = self.controls.wet() as f64;
        let dry = self.controls.dry() as f64;
        let delay = self.delay_samples;
        let frames = input.len().min(output.len()) / channels;

        for frame in 0..frames {
            let w = self.write_pos;
            for (ch, ring) in self.rings.iter_mut().enumerate() {
                let len = ring.len();
                let idx = frame * channels + ch;
                let x = input[idx];
                let delayed = ring[(w + len - delay) % len];

                let fed = x as i64 + (delayed as f64 * feedback).round() as i64;
                ring[w] = saturate(fed);

                let mixed = (x as f64 * dry).round() as i64 + (delayed as f64 * wet).round() as i64;
                output[idx] = saturate(mixed);
            }
            self.write_pos = (w + 1) % (self.delay_samples + BUFFER_HEADROOM);
        }
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate > 0 {
            // Rings follow on the next block
            self.sample_rate = sample_rate;
        }
    }

    fn reset(&mut self) {
        self.rings.iter_mut().for_each(|ring| ring.fill(0));
        self.write_pos = 0;
    }
}

impl ControlledEffect for Delay {
    type Controls = DelayControls;

    fn typed_controls(&self) -> Arc<DelayControls> {
        Arc::clone(&self.controls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    /// 10 ms at 1 kHz is a 10-sample delay
    fn short_delay() -> Delay {
        let mut delay = Delay::new(10.0);
        delay.set_sample_rate(1000);
        delay
    }

    #[test]
    fn test_delay_defaults() {
        let delay = Delay::default();
        assert_eq!(delay.params().time_ms(), 250.0);
        assert_eq!(delay.params().feedback(), 0.3);
        assert_eq!(delay.params().wet(), 0.3);
        assert_eq!(delay.params().dry(), 0.7);
        assert_eq!(delay.delay_samples(), 12000);
    }

    #[test_case(0.0, 1.0 ; "time floor")]
    #[test_case(5000.0, 2000.0 ; "time ceiling")]
    #[test_case(120.0, 120.0 ; "time in range")]
    fn test_time_clamp(requested: f32, expected: f32) {
        let controls = DelayControls::default();
        assert_eq!(controls.set_time_ms(requested), expected);
    }

    #[test]
    fn test_feedback_and_mix_clamp() {
        let controls = DelayControls::default();
        assert_eq!(controls.set_feedback(1.0), 0.95);
        assert_eq!(controls.set_feedback(-0.2), 0.0);
        assert_eq!(controls.set_mix(1.5, -1.0), (1.0, 0.0));
    }

    #[test]
    fn test_echo_timing_and_feedback() {
        let mut delay = short_delay();
        let mut input = vec![0; 40];
        input[0] = 1000;
        let mut output = vec![0; 40];
        delay.process(&input, &mut output, 1);

        assert_eq!(output[0], 700);
        assert_eq!(output[10], 300);
        assert_eq!(output[20], 90);
        assert_eq!(output[5], 0);
    }

    #[test]
    fn test_saturates_without_sign_wrap() {
        let mut delay = short_delay();
        delay.params().set_feedback(0.95);
        delay.params().set_mix(1.0, 1.0);

        let input = vec![i32::MAX; 64];
        let mut output = vec![0; 64];
        delay.process(&input, &mut output, 1);
        assert!(output.iter().all(|&s| s == i32::MAX));

        let input = vec![i32::MIN; 64];
        delay.process(&input, &mut output, 1);
        assert!(output[20..].iter().all(|&s| s == i32::MIN));
    }

    #[test]
    fn test_channels_are_independent() {
        let mut delay = short_delay();
        let mut input = vec![0; 60];
        input[1] = 2000;
        let mut output = vec![0; 60];
        delay.process(&input, &mut output, 2);

        assert_eq!(output[10 * 2 + 1], 600);
        assert_eq!(output[10 * 2], 0);
    }

    #[test]
    fn test_time_change_applies_on_next_block() {
        let mut delay = short_delay();
        let silence = vec![0; 8];
        let mut output = vec![0; 8];
        delay.process(&silence, &mut output, 1);
        assert_eq!(delay.delay_samples, 10);

        delay.params().set_time_ms(4.0);
        assert_eq!(delay.delay_samples, 10);

        let mut input = vec![0; 8];
        input[0] = 1000;
        delay.process(&input, &mut output, 1);
        assert_eq!(delay.delay_samples, 4);
        assert_eq!(output[4], 300);
    }

    #[test]
    fn test_reset_clears_echoes() {
        let mut delay = short_delay();
        let mut input = vec![0; 5];
        input[0] = 1000;
        let mut output = vec![0; 5];
        delay.process(&input, &mut output, 1);

        delay.reset();
        let silence = vec![0; 20];
        let mut output = vec![0; 20];
        delay.process(&silence, &mut output, 1);
        assert!(output.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_disabled_passes_through() {
        let mut delay = short_delay();
        delay.params().set_enabled(false);
        let input: Vec<i32> = (0..16).collect();
        let mut output = vec![0; 16];
        delay.process(&input, &mut output, 2);
        assert_eq!(input, output);
    }

    #[test]
    fn test_set_param_json() {
        let controls = DelayControls::default();
        controls.set_param("time_ms", &json!(500)).unwrap();
        assert_eq!(controls.time_ms(), 500.0);
        controls.set_param("enabled", &json!(false)).unwrap();
        assert!(!controls.is_enabled());
        let err = controls.set_param("ping_pong", &json!(true)).unwrap_err();
        assert_eq!(err.error_code(), "UNKNOWN_PARAMETER");
    }
}
