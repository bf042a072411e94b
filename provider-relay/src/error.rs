//! Error types for the relay provider

use bridge_traits::error::BridgeError;
use std::time::Duration;
use thiserror::Error;

/// Relay provider errors
#[derive(Error, Debug)]
pub enum RelayError {
    /// Non-2xx response
    #[error("Relay API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// 2xx response whose body reported `success: false`
    #[error("Relay rejected request: {0}")]
    Rejected(String),

    /// Failed to parse API response
    #[error("Failed to parse relay response: {0}")]
    Parse(String),

    /// Deadline for the call type expired
    #[error("Relay request timed out after {0:?}")]
    Timeout(Duration),

    /// Transport or credential failure from the host bridge
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl From<RelayError> for BridgeError {
    fn from(error: RelayError) -> Self {
        match error {
            RelayError::Api { status, message } => BridgeError::Rejected { status, message },
            RelayError::Rejected(message) => BridgeError::Rejected {
                status: 200,
                message,
            },
            RelayError::Parse(msg) => {
                BridgeError::OperationFailed(format!("Parse error: {}", msg))
            }
            RelayError::Timeout(after) => BridgeError::Timeout(after),
            RelayError::Bridge(e) => e,
        }
    }
}
