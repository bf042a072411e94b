use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Remote service rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether the failure came from the transport rather than the remote service.
    pub fn is_transport(&self) -> bool {
        matches!(self, BridgeError::Timeout(_) | BridgeError::Network(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
