//! Effect trait definition
//!
//! Every stage of the effect chain implements `Effect`. Runtime tuning goes
//! through the effect's shared controls (atomic cells), never through the
//! effect object itself, so the control thread never touches an effect that
//! the processing thread is running.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde_json::Value;

use crate::dsp::param::CommonControls;
use crate::error::Result;

/// Default sample rate before the chain broadcasts the real one
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Generate a short unique instance id such as `delay-3f9a1c2e`
pub fn new_effect_id(effect_type: &str) -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", effect_type, &uuid[..8])
}

/// Shared, thread-safe parameter set of one effect
///
/// Held by both the effect (processing thread) and any number of control
/// handles. All methods take `&self`; the implementations are atomics.
pub trait EffectControls: Send + Sync + fmt::Debug {
    /// Enable flag and reset request
    fn common(&self) -> &CommonControls;

    /// Effect type identifier (e.g. "delay")
    fn effect_type(&self) -> &'static str;

    /// All parameters as JSON (for status and the command loop)
    fn get_params(&self) -> Value;

    /// Set a single parameter by name
    ///
    /// Numeric values are clamped to the legal range. Unknown names and
    /// values of the wrong JSON type are errors.
    fn set_param(&self, name: &str, value: &Value) -> Result<()>;

    fn is_enabled(&self) -> bool {
        self.common().is_enabled()
    }

    fn set_enabled(&self, enabled: bool) {
        self.common().set_enabled(enabled)
    }

    /// Clear the effect's internal state before its next block
    fn request_reset(&self) {
        self.common().request_reset()
    }
}

/// Base trait for all DSP effects
///
/// `input` and `output` are interleaved blocks of the same length;
/// `input.len() / channels` frames are processed.
pub trait Effect: Send {
    /// Process one block from `input` into `output`
    fn process(&mut self, input: &[i32], output: &mut [i32], channels: usize);

    /// Reset effect state
    ///
    /// Clears delay lines, filter memories and LFO phase.
    fn reset(&mut self);

    /// Called when the stream sample rate changes
    fn set_sample_rate(&mut self, sample_rate: u32);

    /// Current sample rate
    fn sample_rate(&self) -> u32;

    /// Get the effect type identifier
    fn effect_type(&self) -> &'static str;

    /// Get human-readable display name
    fn display_name(&self) -> &str;

    /// Get the unique instance ID
    fn id(&self) -> &str;

    /// Set the unique instance ID
    fn set_id(&mut self, id: String);

    /// Shared enable flag and reset request
    fn common(&self) -> &CommonControls;

    /// Type-erased handle to the shared parameters
    fn controls(&self) -> Arc<dyn EffectControls>;

    /// Check if effect is enabled
    fn is_enabled(&self) -> bool {
        self.common().is_enabled()
    }

    /// Enable or disable the effect
    fn set_enabled(&mut self, enabled: bool) {
        self.common().set_enabled(enabled)
    }
}

impl fmt::Debug for dyn Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("type", &self.effect_type())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Effect whose concrete controls type is known at compile time
///
/// Lets `EffectChain::add` hand back a typed handle instead of making the
/// control path downcast a trait object.
pub trait ControlledEffect: Effect {
    type Controls: EffectControls + 'static;

    fn typed_controls(&self) -> Arc<Self::Controls>;
}

/// Typed handle to an effect living inside a chain
///
/// Returned when the effect is added. Derefs to the effect's controls, so
/// `handle.set_feedback(0.5)` works from any thread.
#[derive(Debug)]
pub struct EffectHandle<C> {
    id: String,
    controls: Arc<C>,
}

impl<C> EffectHandle<C> {
    pub(crate) fn new(id: String, controls: Arc<C>) -> Self {
        Self { id, controls }
    }

    /// Instance id of the effect in its chain
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Shared controls
    pub fn controls(&self) -> &Arc<C> {
        &self.controls
    }
}

impl<C> Clone for EffectHandle<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            controls: Arc::clone(&self.controls),
        }
    }
}

impl<C> Deref for EffectHandle<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.controls
    }
}

/// Copy `input` to `output` unchanged (disabled effects, empty chains)
#[inline]
pub fn passthrough(input: &[i32], output: &mut [i32]) {
    let n = input.len().min(output.len());
    output[..n].copy_from_slice(&input[..n]);
}

/// Helper macro to implement common Effect trait methods
///
/// Expects fields `id: String`, `sample_rate: u32` and
/// `controls: Arc<Controls>` on the effect.
#[macro_export]
macro_rules! impl_effect_common {
    ($effect_type:expr, $display_name:expr) => {
        fn effect_type(&self) -> &'static str {
            $effect_type
        }

        fn display_name(&self) -> &str {
            $display_name
        }

        fn id(&self) -> &str {
            &self.id
        }

        fn set_id(&mut self, id: String) {
            self.id = id;
        }

        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn common(&self) -> &$crate::dsp::param::CommonControls {
            $crate::dsp::effect::EffectControls::common(&*self.controls)
        }

        fn controls(&self) -> ::std::sync::Arc<dyn $crate::dsp::effect::EffectControls> {
            self.controls.clone()
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effect_id_format() {
        let id = new_effect_id("reverb");
        assert!(id.starts_with("reverb-"));
        assert_eq!(id.len(), "reverb-".len() + 8);
        assert_ne!(id, new_effect_id("reverb"));
    }

    #[test]
    fn test_passthrough() {
        let input = [1, -2, 3, -4];
        let mut output = [0; 4];
        passthrough(&input, &mut output);
        assert_eq!(input, output);
    }
}
