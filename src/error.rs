//! Error handling for Echoline
//!
//! Init-time failures surface as `EcholineError`. Run-time device and queue
//! conditions have their own types (`DeviceError`, `QueueError`) because the
//! stage threads handle most of them locally.

use thiserror::Error;

use crate::engine::device::DeviceError;

/// Result type alias for Echoline operations
pub type Result<T> = std::result::Result<T, EcholineError>;

/// Main error type for Echoline operations
#[derive(Error, Debug)]
pub enum EcholineError {
    // Device Errors
    #[error("Failed to open {direction} device '{device}': {source}")]
    DeviceOpen {
        device: String,
        direction: String,
        #[source]
        source: DeviceError,
    },

    #[error("Failed to configure device '{device}': {source}")]
    DeviceConfig {
        device: String,
        #[source]
        source: DeviceError,
    },

    #[error("Failed to prepare device '{device}': {source}")]
    DevicePrepare {
        device: String,
        #[source]
        source: DeviceError,
    },

    #[error("Channel mismatch: capture negotiated {capture}, playback negotiated {playback}")]
    ChannelMismatch { capture: u16, playback: u16 },

    // Configuration Errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Effect Errors
    #[error("Invalid value for parameter '{param}': {value} (expected {expected})")]
    InvalidParameter {
        param: String,
        value: String,
        expected: String,
    },

    #[error("Effect '{effect}' has no parameter '{param}'")]
    UnknownParameter { effect: String, param: String },

    #[error("Effect not found: {effect_id}")]
    EffectNotFound { effect_id: String },

    // Lifecycle Errors
    #[error("Pipeline is already running")]
    AlreadyRunning,

    #[error("Pipeline was stopped and cannot be restarted; initialize a new one")]
    NotRestartable,

    #[error("Failed to spawn {stage} thread: {source}")]
    ThreadSpawn {
        stage: &'static str,
        #[source]
        source: std::io::Error,
    },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EcholineError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            EcholineError::DeviceOpen { .. } => "DEVICE_OPEN",
            EcholineError::DeviceConfig { .. } => "DEVICE_CONFIG",
            EcholineError::DevicePrepare { .. } => "DEVICE_PREPARE",
            EcholineError::ChannelMismatch { .. } => "CHANNEL_MISMATCH",
            EcholineError::InvalidConfig { .. } => "INVALID_CONFIG",
            EcholineError::InvalidParameter { .. } => "INVALID_PARAMETER",
            EcholineError::UnknownParameter { .. } => "UNKNOWN_PARAMETER",
            EcholineError::EffectNotFound { .. } => "EFFECT_NOT_FOUND",
            EcholineError::AlreadyRunning => "ALREADY_RUNNING",
            EcholineError::NotRestartable => "NOT_RESTARTABLE",
            EcholineError::ThreadSpawn { .. } => "THREAD_SPAWN",
            EcholineError::Io(_) => "IO_ERROR",
            EcholineError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if the caller can retry or correct the request without
    /// rebuilding the pipeline
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EcholineError::InvalidParameter { .. }
                | EcholineError::UnknownParameter { .. }
                | EcholineError::EffectNotFound { .. }
                | EcholineError::AlreadyRunning
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = EcholineError::EffectNotFound {
            effect_id: "delay-1".to_string(),
        };
        assert_eq!(err.error_code(), "EFFECT_NOT_FOUND");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_device_errors_are_fatal() {
        let err = EcholineError::DeviceOpen {
            device: "hw:0".to_string(),
            direction: "capture".to_string(),
            source: DeviceError::NotFound {
                name: "hw:0".to_string(),
            },
        };
        assert_eq!(err.error_code(), "DEVICE_OPEN");
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("hw:0"));
    }
}
