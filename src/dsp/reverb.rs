//! Reverb effect
//!
//! Schroeder-style room reverb:
//! - 8-tap early reflections per channel
//! - 4 parallel damped comb filters per channel
//! - 3 series all-pass filters per channel for diffusion
//! - Distinct left/right delay lengths for stereo width
//!
//! Room presets fix size, decay, damping, diffusion and early-reflection
//! level together; each value can be retuned afterwards.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::effect::{
    new_effect_id, passthrough, ControlledEffect, Effect, EffectControls, DEFAULT_SAMPLE_RATE,
};
use super::filters::{AllPassFilter, CombFilter, EarlyReflections};
use super::param::{CommonControls, FloatParam};
use super::sample::{to_fixed, to_float};
use crate::error::{EcholineError, Result};
use crate::impl_effect_common;

// ============================================================================
// Constants
// ============================================================================

/// Parallel comb filters per channel
const NUM_COMBS: usize = 4;

/// Series all-pass filters per channel
const NUM_ALLPASS: usize = 3;

/// Comb base delay per unit room size (seconds)
const COMB_BASE_SECS: f32 = 0.03;

/// All-pass base delay per unit room size (seconds)
const ALLPASS_BASE_SECS: f32 = 0.005;

/// Left comb delay multipliers
const COMB_MULTS_LEFT: [f32; NUM_COMBS] = [1.0, 1.13, 1.27, 1.41];

/// Right comb delay multipliers (offset for stereo width)
const COMB_MULTS_RIGHT: [f32; NUM_COMBS] = [1.05, 1.18, 1.32, 1.46];

/// Left all-pass delay multipliers
const ALLPASS_MULTS_LEFT: [f32; NUM_ALLPASS] = [1.0, 2.1, 3.7];

/// Right all-pass delay multipliers
const ALLPASS_MULTS_RIGHT: [f32; NUM_ALLPASS] = [1.1, 2.3, 3.9];

/// Right early reflections use a slightly larger room
const EARLY_RIGHT_SCALE: f32 = 1.05;

/// All-pass gain per unit diffusion
const DIFFUSION_GAIN: f32 = 0.7;

/// Level of the late (comb + all-pass) tail in the wet signal
const LATE_LEVEL: f32 = 0.7;

/// Wet mix applied when a preset is selected
const PRESET_MIX: f32 = 0.3;

// ============================================================================
// Room Presets
// ============================================================================

/// Room model selecting a parameter preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    SmallRoom,
    #[default]
    MediumRoom,
    LargeHall,
    Cathedral,
    Plate,
    Spring,
    /// Keeps whatever values are currently set
    Custom,
}

/// Parameter set of one room preset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoomPreset {
    pub room_size: f32,
    pub decay: f32,
    pub damping: f32,
    pub diffusion: f32,
    pub early_reflection_level: f32,
}

impl RoomType {
    pub const ALL: [RoomType; 7] = [
        RoomType::SmallRoom,
        RoomType::MediumRoom,
        RoomType::LargeHall,
        RoomType::Cathedral,
        RoomType::Plate,
        RoomType::Spring,
        RoomType::Custom,
    ];

    /// Preset values for this room (`None` for `Custom`)
    pub fn preset(self) -> Option<RoomPreset> {
        let (room_size, decay, damping, diffusion, early_reflection_level) = match self {
            RoomType::SmallRoom => (0.3, 0.5, 0.3, 0.6, 0.4),
            RoomType::MediumRoom => (0.7, 0.7, 0.2, 0.7, 0.3),
            RoomType::LargeHall => (1.5, 0.85, 0.15, 0.8, 0.2),
            RoomType::Cathedral => (2.5, 0.92, 0.1, 0.9, 0.15),
            RoomType::Plate => (0.8, 0.8, 0.05, 0.95, 0.1),
            RoomType::Spring => (0.4, 0.6, 0.4, 0.5, 0.5),
            RoomType::Custom => return None,
        };
        Some(RoomPreset {
            room_size,
            decay,
            damping,
            diffusion,
            early_reflection_level,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RoomType::SmallRoom => "small_room",
            RoomType::MediumRoom => "medium_room",
            RoomType::LargeHall => "large_hall",
            RoomType::Cathedral => "cathedral",
            RoomType::Plate => "plate",
            RoomType::Spring => "spring",
            RoomType::Custom => "custom",
        }
    }

    fn index(self) -> u8 {
        Self::ALL.iter().position(|r| *r == self).unwrap_or(0) as u8
    }

    fn from_index(index: u8) -> Self {
        Self::ALL
            .get(index as usize)
            .copied()
            .unwrap_or(RoomType::Custom)
    }
}

impl fmt::Display for RoomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomType {
    type Err = EcholineError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        RoomType::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == normalized)
            .ok_or_else(|| EcholineError::InvalidParameter {
                param: "room_type".to_string(),
                value: s.to_string(),
                expected: "small_room, medium_room, large_hall, cathedral, plate, spring or custom"
                    .to_string(),
            })
    }
}

// ============================================================================
// Controls
// ============================================================================

/// Shared reverb parameters
#[derive(Debug)]
pub struct ReverbControls {
    common: CommonControls,
    room_type: AtomicU8,
    room_size: FloatParam,
    decay: FloatParam,
    damping: FloatParam,
    diffusion: FloatParam,
    early_reflection_level: FloatParam,
    mix: FloatParam,
}

impl ReverbControls {
    pub fn new(room_type: RoomType) -> Self {
        let controls = Self {
            common: CommonControls::new(),
            room_type: AtomicU8::new(room_type.index()),
            room_size: FloatParam::new(0.7, 0.1, 3.0),
            decay: FloatParam::new(0.7, 0.1, 0.99),
            damping: FloatParam::new(0.2, 0.0, 1.0),
            diffusion: FloatParam::new(0.7, 0.0, 1.0),
            early_reflection_level: FloatParam::new(0.3, 0.0, 1.0),
            mix: FloatParam::new(PRESET_MIX, 0.0, 1.0),
        };
        controls.set_room_type(room_type);
        controls
    }

    /// Select a room preset
    ///
    /// Loads the preset values and resets the mix to 30% wet. `Custom`
    /// keeps the current values.
    pub fn set_room_type(&self, room_type: RoomType) {
        self.room_type.store(room_type.index(), Ordering::Relaxed);
        if let Some(preset) = room_type.preset() {
            self.room_size.set(preset.room_size);
            self.decay.set(preset.decay);
            self.damping.set(preset.damping);
            self.diffusion.set(preset.diffusion);
            self.early_reflection_level
                .set(preset.early_reflection_level);
            self.mix.set(PRESET_MIX);
        }
    }

    pub fn room_type(&self) -> RoomType {
        RoomType::from_index(self.room_type.load(Ordering::Relaxed))
    }

    /// Room size (0.1-3.0); changing it rebuilds the filter banks
    pub fn set_room_size(&self, size: f32) -> f32 {
        self.room_size.set(size)
    }

    pub fn room_size(&self) -> f32 {
        self.room_size.get()
    }

    /// Comb feedback (0.1-0.99)
    pub fn set_decay(&self, decay: f32) -> f32 {
        self.decay.set(decay)
    }

    pub fn decay(&self) -> f32 {
        self.decay.get()
    }

    /// Comb lowpass damping (0-1)
    pub fn set_damping(&self, damping: f32) -> f32 {
        self.damping.set(damping)
    }

    pub fn damping(&self) -> f32 {
        self.damping.get()
    }

    /// All-pass diffusion (0-1)
    pub fn set_diffusion(&self, diffusion: f32) -> f32 {
        self.diffusion.set(diffusion)
    }

    pub fn diffusion(&self) -> f32 {
        self.diffusion.get()
    }

    /// Early reflection level (0-1)
    pub fn set_early_reflection_level(&self, level: f32) -> f32 {
        self.early_reflection_level.set(level)
    }

    pub fn early_reflection_level(&self) -> f32 {
        self.early_reflection_level.get()
    }

    /// Wet/dry mix (0 = dry, 1 = wet)
    pub fn set_mix(&self, mix: f32) -> f32 {
        self.mix.set(mix)
    }

    pub fn mix(&self) -> f32 {
        self.mix.get()
    }
}

impl EffectControls for ReverbControls {
    fn common(&self) -> &CommonControls {
        &self.common
    }

    fn effect_type(&self) -> &'static str {
        "reverb"
    }

    fn get_params(&self) -> Value {
        json!({
            "enabled": self.is_enabled(),
            "room_type": self.room_type().as_str(),
            "room_size": self.room_size(),
            "decay": self.decay(),
            "damping": self.damping(),
            "diffusion": self.diffusion(),
            "early_reflection_level": self.early_reflection_level(),
            "mix": self.mix(),
        })
    }

    fn set_param(&self, name: &str, value: &Value) -> Result<()> {
        match name {
            "enabled" => {
                self.set_enabled(super::param::json_bool(name, value)?);
                Ok(())
            }
            "room_type" => {
                let room = value
                    .as_str()
                    .ok_or_else(|| EcholineError::InvalidParameter {
                        param: name.to_string(),
                        value: value.to_string(),
                        expected: "a room name".to_string(),
                    })?
                    .parse::<RoomType>()?;
                self.set_room_type(room);
                Ok(())
            }
            "room_size" => self.room_size.set_json(name, value),
            "decay" => self.decay.set_json(name, value),
            "damping" => self.damping.set_json(name, value),
            "diffusion" => self.diffusion.set_json(name, value),
            "early_reflection_level" => self.early_reflection_level.set_json(name, value),
            "mix" => self.mix.set_json(name, value),
            _ => Err(EcholineError::UnknownParameter {
                effect: "reverb".to_string(),
                param: name.to_string(),
            }),
        }
    }
}

// ============================================================================
// Filter Bank
// ============================================================================

/// One channel's worth of reverb filters
#[derive(Debug, Clone)]
struct FilterBank {
    combs: [CombFilter; NUM_COMBS],
    allpasses: [AllPassFilter; NUM_ALLPASS],
    early: EarlyReflections,
}

impl FilterBank {
    fn new(
        sample_rate: u32,
        settings: &Applied,
        comb_mults: &[f32; NUM_COMBS],
        allpass_mults: &[f32; NUM_ALLPASS],
        early_size: f32,
    ) -> Self {
        let sr = sample_rate as f32;
        let comb_base = settings.room_size * sr * COMB_BASE_SECS;
        let allpass_base = settings.room_size * sr * ALLPASS_BASE_SECS;
        Self {
            combs: std::array::from_fn(|i| {
                CombFilter::new(
                    (comb_base * comb_mults[i]).round() as usize,
                    settings.decay,
                    settings.damping,
                )
            }),
            allpasses: std::array::from_fn(|i| {
                AllPassFilter::new(
                    (allpass_base * allpass_mults[i]).round() as usize,
                    settings.diffusion * DIFFUSION_GAIN,
                )
            }),
            early: EarlyReflections::new(sample_rate, early_size),
        }
    }

    #[inline]
    fn process(&mut self, input: f32, early_level: f32) -> f32 {
        let early = self.early.process(input) * early_level;

        let comb_sum: f32 = self.combs.iter_mut().map(|c| c.process(input)).sum();
        let mut late = comb_sum / NUM_COMBS as f32;
        for allpass in &mut self.allpasses {
            late = allpass.process(late);
        }

        early + late * LATE_LEVEL
    }

    fn set_decay(&mut self, decay: f32) {
        self.combs.iter_mut().for_each(|c| c.set_feedback(decay));
    }

    fn set_damping(&mut self, damping: f32) {
        self.combs.iter_mut().for_each(|c| c.set_damping(damping));
    }

    fn set_diffusion(&mut self, diffusion: f32) {
        self.allpasses
            .iter_mut()
            .for_each(|a| a.set_gain(diffusion * DIFFUSION_GAIN));
    }

    fn clear(&mut self) {
        self.combs.iter_mut().for_each(CombFilter::clear);
        self.allpasses.iter_mut().for_each(AllPassFilter::clear);
        self.early.clear();
    }
}

/// Parameter values the filter banks were last built or tuned with
#[derive(Debug, Clone, Copy)]
struct Applied {
    room_size: f32,
    decay: f32,
    damping: f32,
    diffusion: f32,
}

impl Applied {
    fn from_controls(controls: &ReverbControls) -> Self {
        Self {
            room_size: controls.room_size(),
            decay: controls.decay(),
            damping: controls.damping(),
            diffusion: controls.diffusion(),
        }
    }
}

// ============================================================================
// Main Reverb Effect
// ============================================================================

/// Room reverb with presets
///
/// Parameter changes arrive through `ReverbControls`. At the start of each
/// block the effect compares them with what its filters were built with: a
/// new room size (or sample rate) rebuilds every delay line, while decay,
/// damping and diffusion are retuned in place without reallocating.
#[derive(Debug)]
pub struct Reverb {
    id: String,
    sample_rate: u32,
    controls: Arc<ReverbControls>,
    left: FilterBank,
    right: FilterBank,
    applied: Applied,
}

impl Reverb {
    /// Create a reverb using a room preset
    pub fn new(room_type: RoomType) -> Self {
        Self::with_controls(Arc::new(ReverbControls::new(room_type)))
    }

    fn with_controls(controls: Arc<ReverbControls>) -> Self {
        let applied = Applied::from_controls(&controls);
        let (left, right) = Self::build_banks(DEFAULT_SAMPLE_RATE, &applied);
        Self {
            id: new_effect_id("reverb"),
            sample_rate: DEFAULT_SAMPLE_RATE,
            controls,
            left,
            right,
            applied,
        }
    }

    /// Shared parameters
    pub fn params(&self) -> &ReverbControls {
        &self.controls
    }

    /// Comb delay lengths of the left bank (for inspection)
    pub fn comb_delays(&self) -> [usize; NUM_COMBS] {
        std::array::from_fn(|i| self.left.combs[i].delay_samples())
    }

    fn build_banks(sample_rate: u32, applied: &Applied) -> (FilterBank, FilterBank) {
        let left = FilterBank::new(
            sample_rate,
            applied,
            &COMB_MULTS_LEFT,
            &ALLPASS_MULTS_LEFT,
            applied.room_size,
        );
        let right = FilterBank::new(
            sample_rate,
            applied,
            &COMB_MULTS_RIGHT,
            &ALLPASS_MULTS_RIGHT,
            applied.room_size * EARLY_RIGHT_SCALE,
        );
        (left, right)
    }

    fn rebuild(&mut self) {
        self.applied = Applied::from_controls(&self.controls);
        let (left, right) = Self::build_banks(self.sample_rate, &self.applied);
        self.left = left;
        self.right = right;
        log::debug!(
            "reverb {}: rebuilt filter banks for room size {:.2}",
            self.id,
            self.applied.room_size
        );
    }

    /// Bring the filters in line with the shared parameters
    fn sync_controls(&mut self) {
        let current = Applied::from_controls(&self.controls);
        if current.room_size != self.applied.room_size {
            self.rebuild();
            return;
        }
        if current.decay != self.applied.decay {
            self.left.set_decay(current.decay);
            self.right.set_decay(current.decay);
        }
        if current.damping != self.applied.damping {
            self.left.set_damping(current.damping);
            self.right.set_damping(current.damping);
        }
        if current.diffusion != self.applied.diffusion {
            self.left.set_diffusion(current.diffusion);
            self.right.set_diffusion(current.diffusion);
        }
        self.applied = current;
    }
}

impl Default for Reverb {
    fn default() -> Self {
        Self::new(RoomType::default())
    }
}

impl Effect for Reverb {
    impl_effect_common!("reverb", "Reverb");

    fn process(&mut self, input: &[i32], output: &mut [i32], channels: usize) {
        if !self.is_enabled() || channels == 0 {
            passthrough(input, output);
            return;
        }
        self.sync_controls();

        let mix = self.controls.mix();
        let early_level = self.controls.early_reflection_level();
        let frames = input.len().min(output.len()) / channels;

        for frame in 0..frames {
            let base = frame * channels;
            if channels == 1 {
                let x = to_float(input[base]);
                let wet = self.left.process(x, early_level);
                output[base] = to_fixed(x * (1.0 - mix) + wet * mix);
                continue;
            }

            let l = to_float(input[base]);
            let r = to_float(input[base + 1]);
            let mono = (l + r) * 0.5;
            let wet_l = self.left.process(mono, early_level);
            let wet_r = self.right.process(mono, early_level);
            output[base] = to_fixed(l * (1.0 - mix) + wet_l * mix);
            output[base + 1] = to_fixed(r * (1.0 - mix) + wet_r * mix);
            output[base + 2..base + channels].copy_from_slice(&input[base + 2..base + channels]);
        }
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate == 0 || sample_rate == self.sample_rate {
            return;
        }
        self.sample_rate = sample_rate;
        self.rebuild();
    }

    fn reset(&mut self) {
        self.left.clear();
        self.right.clear();
    }
}

impl ControlledEffect for Reverb {
    type Controls = ReverbControls;

    fn typed_controls(&self) -> Arc<ReverbControls> {
        Arc::clone(&self.controls)
    }
}
