//! Lock-free effect parameters
//!
//! Effect parameters are written by the control thread while the processing
//! thread reads them mid-block. Every mutable parameter is one of these
//! atomic cells; nothing about an effect's tuning is shared unsynchronized.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use serde_json::Value;

use crate::error::{EcholineError, Result};

/// f32 parameter stored as bits in an `AtomicU32`, clamped on every write
#[derive(Debug)]
pub struct FloatParam {
    bits: AtomicU32,
    min: f32,
    max: f32,
}

impl FloatParam {
    /// Create a parameter with an inclusive legal range
    pub fn new(value: f32, min: f32, max: f32) -> Self {
        let value = clamp_finite(value, min, max);
        Self {
            bits: AtomicU32::new(value.to_bits()),
            min,
            max,
        }
    }

    /// Current value
    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Store a value, clamped to the legal range
    ///
    /// Returns the value actually stored.
    #[inline]
    pub fn set(&self, value: f32) -> f32 {
        let value = clamp_finite(value, self.min, self.max);
        self.bits.store(value.to_bits(), Ordering::Relaxed);
        value
    }

    /// Inclusive legal range
    pub fn range(&self) -> (f32, f32) {
        (self.min, self.max)
    }

    /// Set from a JSON number
    pub fn set_json(&self, name: &str, value: &Value) -> Result<()> {
        let v = value
            .as_f64()
            .ok_or_else(|| EcholineError::InvalidParameter {
                param: name.to_string(),
                value: value.to_string(),
                expected: format!("a number in {} to {}", self.min, self.max),
            })?;
        self.set(v as f32);
        Ok(())
    }
}

/// NaN falls back to the bottom of the range
fn clamp_finite(value: f32, min: f32, max: f32) -> f32 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

/// Flags common to every effect
#[derive(Debug)]
pub struct CommonControls {
    enabled: AtomicBool,
    reset_pending: AtomicBool,
}

impl CommonControls {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            reset_pending: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Ask the processing thread to clear this effect's state before its
    /// next block
    pub fn request_reset(&self) {
        self.reset_pending.store(true, Ordering::Release);
    }

    /// Consume a pending reset request
    #[inline]
    pub fn take_reset(&self) -> bool {
        self.reset_pending.swap(false, Ordering::Acquire)
    }
}

impl Default for CommonControls {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a JSON bool for a named parameter
pub fn json_bool(name: &str, value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| EcholineError::InvalidParameter {
        param: name.to_string(),
        value: value.to_string(),
        expected: "true or false".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_float_param_clamps() {
        let p = FloatParam::new(0.5, 0.0, 0.95);
        assert_eq!(p.get(), 0.5);
        assert_eq!(p.set(2.0), 0.95);
        assert_eq!(p.get(), 0.95);
        assert_eq!(p.set(-1.0), 0.0);
        assert_eq!(p.set(f32::NAN), 0.0);
    }

    #[test]
    fn test_float_param_initial_value_clamped() {
        let p = FloatParam::new(10.0, 1.0, 2.0);
        assert_eq!(p.get(), 2.0);
        assert_eq!(p.range(), (1.0, 2.0));
    }

    #[test]
    fn test_float_param_json() {
        let p = FloatParam::new(0.0, 0.0, 1.0);
        p.set_json("mix", &json!(0.25)).unwrap();
        assert_eq!(p.get(), 0.25);
        let err = p.set_json("mix", &json!("loud")).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_PARAMETER");
    }

    #[test]
    fn test_reset_request_is_consumed_once() {
        let c = CommonControls::new();
        assert!(!c.take_reset());
        c.request_reset();
        assert!(c.take_reset());
        assert!(!c.take_reset());
    }

    #[test]
    fn test_json_bool() {
        assert!(json_bool("enabled", &json!(true)).unwrap());
        assert!(json_bool("enabled", &json!(1)).is_err());
    }
}
