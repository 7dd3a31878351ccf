//! Unified error handling for deckvolt
//!
//! A single error type shared by the control library and the daemon. Variants are
//! grouped by how the daemon reacts to them: configuration errors refuse startup,
//! sensor errors are transient and absorbed by the sampling loop, actuation errors
//! degrade the current tick, and stalls trigger the safe shutdown path.

use std::io;
use std::path::PathBuf;

/// Result type alias using DeckvoltError
pub type Result<T> = std::result::Result<T, DeckvoltError>;

/// Unified error type for all deckvolt operations
#[derive(thiserror::Error, Debug)]
pub enum DeckvoltError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("File too large: {path} ({size} bytes, max {max_size} bytes)")]
    FileTooLarge {
        path: PathBuf,
        size: u64,
        max_size: u64,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("Curve validation failed: {0}")]
    InvalidCurve(String),

    // ============================================================================
    // Sensor Errors (transient)
    // ============================================================================
    #[error("Failed to read sensor {source_name}: {reason}")]
    SensorRead {
        source_name: String,
        reason: String,
    },

    #[error("Counter reset detected on {0}")]
    CounterReset(String),

    // ============================================================================
    // Actuation Errors
    // ============================================================================
    #[error("Voltage actuation failed: {0}")]
    Actuation(String),

    #[error("Voltage actuation timed out after {timeout_ms} ms")]
    ActuationTimeout {
        timeout_ms: u64,
    },

    #[error("Actuation gate closed: {0}")]
    GateClosed(String),

    #[error("Offset {value_mv} mV outside safety envelope [{floor_mv}, {ceiling_mv}]")]
    HardwareLimit {
        value_mv: i32,
        floor_mv: i32,
        ceiling_mv: i32,
    },

    // ============================================================================
    // Fan Device Errors
    // ============================================================================
    #[error("Fan device error at {path}: {reason}")]
    FanDevice {
        path: PathBuf,
        reason: String,
    },

    #[error("Hardware not found: {0}")]
    HardwareNotFound(String),

    // ============================================================================
    // Supervision Errors
    // ============================================================================
    #[error("Control loop stalled for {elapsed_ms} ms (timeout {timeout_ms} ms)")]
    Stall {
        elapsed_ms: u64,
        timeout_ms: u64,
    },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),
}

impl DeckvoltError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid-config error for a named field
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a sensor read error
    pub fn sensor(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SensorRead {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Create an actuation error from a string
    pub fn actuation(msg: impl Into<String>) -> Self {
        Self::Actuation(msg.into())
    }

    /// Create a fan device error
    pub fn fan_device(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FanDevice {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for errors the control loop absorbs without changing behavior
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SensorRead { .. } | Self::CounterReset(_))
    }

    /// True for errors that must refuse startup
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::JsonParse(_)
                | Self::InvalidConfig { .. }
                | Self::InvalidCurve(_)
                | Self::FileTooLarge { .. }
        )
    }
}

// Allow converting from String to DeckvoltError
impl From<String> for DeckvoltError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to DeckvoltError
impl From<&str> for DeckvoltError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}
