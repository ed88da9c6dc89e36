//! Credential source implementations.

use crate::backend::CredentialSource;
use crate::error::CredentialError;
use crate::types::AccessToken;

/// A credential source that hands out a fixed token.
///
/// Suitable when the token is provisioned externally (environment,
/// orchestrator secret) and for tests. An empty token is treated as a
/// rejected request rather than silently logging in with nothing.
#[derive(Debug, Clone)]
pub struct StaticCredentialSource {
    token: AccessToken,
}

impl StaticCredentialSource {
    /// Creates a source around a provisioned token value.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(token),
        }
    }
}

impl CredentialSource for StaticCredentialSource {
    async fn fetch_access_token(&self) -> Result<AccessToken, CredentialError> {
        if self.token.is_empty() {
            return Err(CredentialError::Rejected("no token provisioned".into()));
        }
        Ok(self.token.clone())
    }
}
