//! Caller-facing error types
//!
//! Configuration errors are fatal and surface from construction. Usage
//! errors (an operation that needs a live connection attempted without
//! one) are recoverable: the operation is skipped and nothing else changes.
//! Transport failures that arrive asynchronously are never returned from an
//! API call; they reach the caller through the lifecycle callbacks.

use crate::client::ConnectionState;
use crate::config::ConfigError;
use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Main error type for socket client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Cannot {operation}: no socket connected (state: {state:?})")]
    NotConnected {
        operation: &'static str,
        state: ConnectionState,
    },

    #[error("Timed out after {waited:?} waiting for state {target:?}")]
    Timeout {
        target: ConnectionState,
        waited: Duration,
    },

    #[error("Client event loop has stopped")]
    EventLoopStopped,

    #[error("No Tokio runtime to run the client event loop: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

impl ClientError {
    pub fn not_connected(operation: &'static str, state: ConnectionState) -> Self {
        Self::NotConnected { operation, state }
    }

    /// Usage errors leave client state untouched and may simply be retried
    pub fn is_usage_error(&self) -> bool {
        matches!(self, ClientError::NotConnected { .. })
    }
}

/// Result type for socket client operations
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_connected_message() {
        let error = ClientError::not_connected("publish", ConnectionState::Disconnected);
        assert!(error.is_usage_error());
        assert_eq!(
            error.to_string(),
            "Cannot publish: no socket connected (state: Disconnected)"
        );
    }

    #[test]
    fn test_wrapped_errors_are_not_usage_errors() {
        let config: ClientError = ConfigError::MissingUrl.into();
        let transport: ClientError = TransportError::SessionClosed.into();

        assert!(!config.is_usage_error());
        assert!(!transport.is_usage_error());
        assert!(config.to_string().contains("Socket url not defined"));
    }

    #[test]
    fn test_error_display() {
        let errors = vec![
            ClientError::Timeout {
                target: ConnectionState::Connected,
                waited: Duration::from_millis(50),
            },
            ClientError::EventLoopStopped,
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
