//! Error types and handling for Fuseguard
//!
//! This module defines the error types used throughout the engine. The
//! variants mirror the failure taxonomy the controller reports in its fault
//! events: transient device errors are absorbed per tick, only configuration
//! errors are fatal (and only at construction).

use crate::types::Phase;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for Fuseguard operations
pub type Result<T> = std::result::Result<T, FuseguardError>;

/// Main error type for Fuseguard
#[derive(Debug, Error)]
pub enum FuseguardError {
    /// Configuration file or setup errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Invalid configuration value; a controller is never built from it
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// The meter could not produce a usable reading for a phase
    #[error("Meter unavailable on {phase}: {message}")]
    MeterUnavailable { phase: Phase, message: String },

    /// The charger did not acknowledge a set-limit command
    #[error("Charger command failed: {message}")]
    ChargerCommandFailed { message: String },

    /// The charger cannot answer any query
    #[error("Charger unreachable: {message}")]
    ChargerUnreachable { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

/// Failure kind as reported in fault events and log entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    MeterUnavailable,
    ChargerCommandFailed,
    ChargerUnreachable,
    ConfigurationInvalid,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::MeterUnavailable => "METER_UNAVAILABLE",
            ErrorKind::ChargerCommandFailed => "CHARGER_COMMAND_FAILED",
            ErrorKind::ChargerUnreachable => "CHARGER_UNREACHABLE",
            ErrorKind::ConfigurationInvalid => "CONFIGURATION_INVALID",
            ErrorKind::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

impl FuseguardError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        FuseguardError::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        FuseguardError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new meter-unavailable error for a phase
    pub fn meter_unavailable<S: Into<String>>(phase: Phase, message: S) -> Self {
        FuseguardError::MeterUnavailable {
            phase,
            message: message.into(),
        }
    }

    /// Create a new charger-command-failed error
    pub fn charger_command_failed<S: Into<String>>(message: S) -> Self {
        FuseguardError::ChargerCommandFailed {
            message: message.into(),
        }
    }

    /// Create a new charger-unreachable error
    pub fn charger_unreachable<S: Into<String>>(message: S) -> Self {
        FuseguardError::ChargerUnreachable {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        FuseguardError::Io {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        FuseguardError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        FuseguardError::Generic {
            message: message.into(),
        }
    }

    /// Taxonomy kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            FuseguardError::MeterUnavailable { .. } => ErrorKind::MeterUnavailable,
            FuseguardError::ChargerCommandFailed { .. } => ErrorKind::ChargerCommandFailed,
            FuseguardError::ChargerUnreachable { .. } | FuseguardError::Timeout { .. } => {
                ErrorKind::ChargerUnreachable
            }
            FuseguardError::Config { .. } | FuseguardError::Validation { .. } => {
                ErrorKind::ConfigurationInvalid
            }
            FuseguardError::Serialization { .. }
            | FuseguardError::Io { .. }
            | FuseguardError::Generic { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the error is fatal for the host process
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::ConfigurationInvalid
    }
}

impl From<std::io::Error> for FuseguardError {
    fn from(err: std::io::Error) -> Self {
        FuseguardError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for FuseguardError {
    fn from(err: serde_yaml::Error) -> Self {
        FuseguardError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for FuseguardError {
    fn from(err: serde_json::Error) -> Self {
        FuseguardError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = FuseguardError::config("test config error");
        assert!(matches!(err, FuseguardError::Config { .. }));

        let err = FuseguardError::meter_unavailable(Phase::L2, "stale");
        assert!(matches!(
            err,
            FuseguardError::MeterUnavailable {
                phase: Phase::L2,
                ..
            }
        ));

        let err = FuseguardError::validation("field", "test validation error");
        assert!(matches!(err, FuseguardError::Validation { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = FuseguardError::config("test error");
        assert_eq!(format!("{}", err), "Configuration error: test error");

        let err = FuseguardError::validation("fuse_rating_amps", "Must be positive");
        assert_eq!(
            format!("{}", err),
            "Validation error: fuse_rating_amps - Must be positive"
        );

        let err = FuseguardError::meter_unavailable(Phase::L1, "voltage 0");
        assert_eq!(format!("{}", err), "Meter unavailable on L1: voltage 0");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            FuseguardError::charger_unreachable("x").kind(),
            ErrorKind::ChargerUnreachable
        );
        assert_eq!(
            FuseguardError::timeout("x").kind(),
            ErrorKind::ChargerUnreachable
        );
        assert!(FuseguardError::validation("a", "b").is_fatal());
        assert!(!FuseguardError::charger_command_failed("nack").is_fatal());
        assert_eq!(ErrorKind::MeterUnavailable.to_string(), "METER_UNAVAILABLE");
    }
}
