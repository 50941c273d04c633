//! Effect Chain management
//!
//! Effects are processed in chain order (index 0 first). The chain owns one
//! scratch block and alternates between it and the caller's buffers, so a
//! block passes through any number of effects without allocating.

use std::sync::Arc;

use serde_json::{json, Value};

use super::effect::{passthrough, ControlledEffect, Effect, EffectControls, EffectHandle, DEFAULT_SAMPLE_RATE};
use crate::error::{EcholineError, Result};

/// Ordered chain of effects
pub struct EffectChain {
    effects: Vec<Box<dyn Effect>>,
    sample_rate: u32,
    /// Intermediate block between stages
    scratch: Vec<i32>,
    /// Indices of the effects enabled for the block being processed
    active: Vec<usize>,
}

impl EffectChain {
    /// Create a new empty effect chain
    pub fn new() -> Self {
        Self::with_sample_rate(DEFAULT_SAMPLE_RATE)
    }

    /// Create an empty chain for a given stream rate
    pub fn with_sample_rate(sample_rate: u32) -> Self {
        Self {
            effects: Vec::new(),
            sample_rate,
            scratch: Vec::new(),
            active: Vec::new(),
        }
    }

    /// Append an effect and return a typed handle to its controls
    pub fn add<E>(&mut self, effect: E) -> EffectHandle<E::Controls>
    where
        E: ControlledEffect + 'static,
    {
        let index = self.effects.len();
        self.insert(index, effect)
    }

    /// Insert an effect at `index` (clamped to the chain length)
    pub fn insert<E>(&mut self, index: usize, effect: E) -> EffectHandle<E::Controls>
    where
        E: ControlledEffect + 'static,
    {
        let handle = EffectHandle::new(effect.id().to_string(), effect.typed_controls());
        self.insert_boxed(index, Box::new(effect));
        handle
    }

    /// Append an already boxed effect, returning its id
    pub fn add_boxed(&mut self, effect: Box<dyn Effect>) -> String {
        let id = effect.id().to_string();
        let index = self.effects.len();
        self.insert_boxed(index, effect);
        id
    }

    fn insert_boxed(&mut self, index: usize, mut effect: Box<dyn Effect>) {
        effect.set_sample_rate(self.sample_rate);
        let index = index.min(self.effects.len());
        log::debug!(
            "effect chain: inserted {} ({}) at {}",
            effect.display_name(),
            effect.id(),
            index
        );
        self.effects.insert(index, effect);
    }

    /// Remove an effect by ID
    pub fn remove(&mut self, effect_id: &str) -> Result<Box<dyn Effect>> {
        let index = self.position(effect_id)?;
        Ok(self.effects.remove(index))
    }

    /// Move an effect to a new position
    pub fn move_effect(&mut self, effect_id: &str, new_index: usize) -> Result<()> {
        let current_index = self.position(effect_id)?;
        let effect = self.effects.remove(current_index);
        let new_index = new_index.min(self.effects.len());
        self.effects.insert(new_index, effect);
        Ok(())
    }

    fn position(&self, effect_id: &str) -> Result<usize> {
        self.effects
            .iter()
            .position(|e| e.id() == effect_id)
            .ok_or_else(|| EcholineError::EffectNotFound {
                effect_id: effect_id.to_string(),
            })
    }

    /// Get a reference to an effect by ID
    pub fn get(&self, effect_id: &str) -> Option<&dyn Effect> {
        self.effects
            .iter()
            .find(|e| e.id() == effect_id)
            .map(|e| e.as_ref())
    }

    /// Shared controls of an effect by ID
    pub fn get_controls(&self, effect_id: &str) -> Option<Arc<dyn EffectControls>> {
        self.get(effect_id).map(|e| e.controls())
    }

    /// Shared controls of the first effect of a type (e.g. "reverb")
    pub fn find_by_type(&self, effect_type: &str) -> Option<Arc<dyn EffectControls>> {
        self.effects
            .iter()
            .find(|e| e.effect_type() == effect_type)
            .map(|e| e.controls())
    }

    /// Effect ids in processing order
    pub fn ids(&self) -> Vec<String> {
        self.effects.iter().map(|e| e.id().to_string()).collect()
    }

    /// Remove every effect
    pub fn clear(&mut self) {
        self.effects.clear();
    }

    /// Reset all effects
    pub fn reset(&mut self) {
        for effect in &mut self.effects {
            effect.reset();
        }
    }

    /// Broadcast a new stream sample rate
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        for effect in &mut self.effects {
            effect.set_sample_rate(sample_rate);
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Apply pending reset requests and note which effects run this block
    fn begin_block(&mut self, samples: usize) {
        self.active.clear();
        for (i, effect) in self.effects.iter_mut().enumerate() {
            if effect.common().take_reset() {
                effect.reset();
            }
            if effect.is_enabled() {
                self.active.push(i);
            }
        }
        if self.scratch.len() < samples {
            self.scratch.resize(samples, 0);
        }
    }

    /// Run one block through every enabled effect
    ///
    /// The last stage writes straight into `output`; earlier stages alternate
    /// between `output` and the scratch block. With nothing enabled `output`
    /// is a copy of `input`.
    pub fn process(&mut self, input: &[i32], output: &mut [i32], channels: usize) {
        let n = input.len().min(output.len());
        self.begin_block(n);
        if self.active.is_empty() {
            passthrough(input, output);
            return;
        }

        let input = &input[..n];
        let output = &mut output[..n];
        let scratch = &mut self.scratch[..n];
        let stages = self.active.len();

        for (stage, &i) in self.active.iter().enumerate() {
            let effect = &mut self.effects[i];
            let to_output = (stages - 1 - stage) % 2 == 0;
            match (stage == 0, to_output) {
                (true, true) => effect.process(input, output, channels),
                (true, false) => effect.process(input, scratch, channels),
                (false, true) => effect.process(scratch, output, channels),
                (false, false) => effect.process(output, scratch, channels),
            }
        }
    }

    /// Run one block through the chain, replacing it with the result
    pub fn process_in_place(&mut self, block: &mut [i32], channels: usize) {
        let n = block.len();
        self.begin_block(n);

        let scratch = &mut self.scratch[..n];
        let mut in_scratch = false;
        for &i in &self.active {
            let effect = &mut self.effects[i];
            if in_scratch {
                effect.process(scratch, block, channels);
            } else {
                effect.process(block, scratch, channels);
            }
            in_scratch = !in_scratch;
        }
        if in_scratch {
            block.copy_from_slice(scratch);
        }
    }

    /// Get the number of effects in the chain
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    /// Check if the chain is empty
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Iterate over effects
    pub fn iter(&self) -> impl Iterator<Item = &dyn Effect> {
        self.effects.iter().map(|e| e.as_ref())
    }

    /// Snapshot of the chain and every effect's parameters
    pub fn to_json(&self) -> Value {
        let effects: Vec<Value> = self
            .effects
            .iter()
            .map(|e| {
                json!({
                    "id": e.id(),
                    "type": e.effect_type(),
                    "name": e.display_name(),
                    "params": e.controls().get_params(),
                })
            })
            .collect();

        json!({
            "effects": effects,
            "sample_rate": self.sample_rate,
        })
    }
}

impl Default for EffectChain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EffectChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectChain")
            .field("effects", &self.ids())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}
