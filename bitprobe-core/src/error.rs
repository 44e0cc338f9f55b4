//! Error types for bitprobe

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Main error type for transport and probe operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    /// Initialization error
    #[error("Initialization failed: {reason}")]
    Initialization {
        /// Reason for initialization failure
        reason: String,
    },

    /// Missing configuration error
    #[error("Missing required configuration: {field}")]
    MissingConfiguration {
        /// Missing configuration field
        field: String,
    },

    /// Configuration present but unusable
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Why the configuration was rejected
        reason: String,
    },

    /// Transport error
    #[error("Transport error: {reason}")]
    Transport {
        /// Reason for transport error
        reason: String,
    },

    /// Invalid state error
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Operation timed out error
    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Duration after which timeout occurred
        duration: Duration,
    },

    /// Serialization or parsing failure
    #[error("Serialization failed: {reason}")]
    Serialization {
        /// Reason for failure
        reason: String,
    },
}

impl ProbeError {
    /// Shorthand for a transport failure
    pub fn transport(reason: impl Into<String>) -> Self {
        ProbeError::Transport {
            reason: reason.into(),
        }
    }

    /// Get error code for programmatic handling
    pub fn error_code(&self) -> String {
        match self {
            ProbeError::Initialization { .. } => "INITIALIZATION_FAILED".to_string(),
            ProbeError::MissingConfiguration { .. } => "MISSING_CONFIGURATION".to_string(),
            ProbeError::InvalidConfiguration { .. } => "INVALID_CONFIGURATION".to_string(),
            ProbeError::Transport { .. } => "TRANSPORT_ERROR".to_string(),
            ProbeError::InvalidState { .. } => "INVALID_STATE".to_string(),
            ProbeError::Timeout { .. } => "TIMEOUT".to_string(),
            ProbeError::Serialization { .. } => "SERIALIZATION_FAILED".to_string(),
        }
    }
}

impl From<serde_json::Error> for ProbeError {
    fn from(err: serde_json::Error) -> Self {
        ProbeError::Serialization {
            reason: err.to_string(),
        }
    }
}

/// An error recorded on a probe session and surfaced to consumers.
///
/// Both fatal and non-fatal failures use this shape; the report carries them
/// in the order they occurred.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct DiagnosticError {
    /// Human readable description of the failed step
    pub message: String,
    /// Underlying cause, if the failing capability supplied one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl DiagnosticError {
    /// Error without an underlying cause
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    /// Error wrapping the cause reported by a capability
    pub fn with_cause(message: impl Into<String>, cause: &ProbeError) -> Self {
        Self {
            message: message.into(),
            cause: Some(cause.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ProbeError::transport("boom").error_code(),
            "TRANSPORT_ERROR"
        );
        assert_eq!(
            ProbeError::MissingConfiguration {
                field: "iceServers".to_string()
            }
            .error_code(),
            "MISSING_CONFIGURATION"
        );
    }

    #[test]
    fn test_diagnostic_error_keeps_cause() {
        let cause = ProbeError::transport("sdp rejected");
        let err = DiagnosticError::with_cause("Unable to create offer", &cause);

        assert_eq!(err.to_string(), "Unable to create offer");
        assert_eq!(err.cause.as_deref(), Some("Transport error: sdp rejected"));
    }

    #[test]
    fn test_diagnostic_error_json_omits_missing_cause() {
        let json = serde_json::to_string(&DiagnosticError::new("No iceServers found")).unwrap();
        assert_eq!(json, r#"{"message":"No iceServers found"}"#);
    }
}
