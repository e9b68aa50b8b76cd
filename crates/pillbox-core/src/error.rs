//! Core error types for pillbox-core.
//!
//! This module defines the error hierarchy using thiserror. Validation
//! failures are surfaced to callers; exact-timer denials are recovered
//! inside the scheduler and only reach callers when the fallback fails too.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for pillbox-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Schedule validation errors
    #[error("Invalid schedule: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Timer service errors
    #[error("Timer error: {0}")]
    Timer(#[from] TimerError),

    /// A mutex guarding scheduler state was poisoned
    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Schedule validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// No weekday selected
    #[error("selected days must not be empty")]
    EmptyDaySet,

    /// End date precedes start date
    #[error("Invalid time range: end_date ({end}) must not precede start_date ({start})")]
    InvalidTimeRange {
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
    },

    /// Hour or minute out of range
    #[error("Invalid time of day: {hour:02}:{minute:02}")]
    InvalidTimeOfDay { hour: u32, minute: u32 },

    /// Weekday tag not recognised
    #[error("Unknown weekday: '{0}'")]
    UnknownWeekday(String),

    /// Required field absent
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Unknown dotted key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Home/config directory could not be determined or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Errors reported by an exact-timer service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    /// The platform refused exact arming (permission or power restriction)
    #[error("exact timer denied: {reason}")]
    Denied { reason: String },

    /// The service could not arm or cancel at all
    #[error("timer service unavailable: {0}")]
    Unavailable(String),
}

/// Errors reported by a notification surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification post failed: {0}")]
    PostFailed(String),

    #[error("notification dismiss failed: {0}")]
    DismissFailed(String),
}

/// Errors returned across the UI command surface.
///
/// Each variant carries a stable string code so hosts can forward it
/// unchanged to a method-channel style caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("method not implemented: {0}")]
    NotImplemented(String),

    #[error("{0}")]
    Scheduler(String),
}

impl CommandError {
    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::InvalidArgument(_) => "INVALID_ARGUMENT",
            CommandError::NotImplemented(_) => "NOT_IMPLEMENTED",
            CommandError::Scheduler(_) => "SCHEDULER_ERROR",
        }
    }
}

impl From<CoreError> for CommandError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(e) => CommandError::InvalidArgument(e.to_string()),
            other => CommandError::Scheduler(other.to_string()),
        }
    }
}

impl From<ValidationError> for CommandError {
    fn from(err: ValidationError) -> Self {
        CommandError::InvalidArgument(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
