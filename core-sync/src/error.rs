use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Remote call failed: {0}")]
    Remote(#[from] BridgeError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SyncError {
    /// Message suitable for a user-facing notification
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Remote(BridgeError::Timeout(after)) => {
                format!("The relay did not answer within {}s", after.as_secs())
            }
            SyncError::Remote(BridgeError::Network(_)) => {
                "The relay could not be reached".to_string()
            }
            SyncError::Remote(BridgeError::Rejected { message, .. }) => message.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_user_message() {
        let timeout = SyncError::Remote(BridgeError::Timeout(Duration::from_secs(15)));
        assert_eq!(timeout.user_message(), "The relay did not answer within 15s");

        let rejected = SyncError::Remote(BridgeError::Rejected {
            status: 400,
            message: "Bad filter".to_string(),
        });
        assert_eq!(rejected.user_message(), "Bad filter");

        let invalid = SyncError::InvalidInput("empty file".to_string());
        assert_eq!(invalid.user_message(), "Invalid input: empty file");
    }
}
