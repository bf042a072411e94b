//! Credential Supply
//!
//! The engine never performs login or token exchange. The host hands it a
//! provider that yields the current bearer token for each request.

use async_trait::async_trait;
use std::fmt;

use crate::error::{BridgeError, Result};

/// Source of the bearer token attached to every relay call
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current access token
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotAvailable`] when the user is signed out.
    async fn bearer_token(&self) -> Result<String>;
}

/// Fixed token, for CLIs and tests
#[derive(Clone)]
pub struct StaticCredential {
    token: String,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredential")
            .field("token", &"***")
            .finish()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn bearer_token(&self) -> Result<String> {
        if self.token.is_empty() {
            return Err(BridgeError::NotAvailable(
                "No access token configured".to_string(),
            ));
        }
        Ok(self.token.clone())
    }
}
