use thiserror::Error;

use velours_shared::AccountId;

/// Errors produced by the transport layer.
#[derive(Error, Debug, Clone)]
pub enum SendError {
    /// The recipient's identity key no longer matches our session state.
    /// Recoverable once by refreshing the profile and retrying.
    #[error("identity key mismatch for {account}")]
    IdentityKeyMismatch { account: AccountId },

    /// Transport-level failure (connection loss, request error, server
    /// rejection).
    #[error("network error: {0}")]
    Network(String),

    /// Wire payload construction failed before anything was sent.
    #[error("payload construction failed: {0}")]
    Payload(String),
}

impl SendError {
    pub fn is_identity_mismatch(&self) -> bool {
        matches!(self, Self::IdentityKeyMismatch { .. })
    }
}
