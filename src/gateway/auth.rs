//! Handshake authentication.

use crate::error::{RealtimeError, Result};
use crate::types::Identity;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Validates a bearer credential presented at handshake time.
///
/// Credential issuance and refresh belong to the surrounding auth stack; the
/// gateway only needs a verdict and the identity behind a token.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, credential: &str) -> Result<Identity>;
}

/// Map-backed token directory.
///
/// Suitable when the broker is embedded behind an auth layer that issues
/// opaque session tokens, and for tests.
#[derive(Default)]
pub struct TokenDirectory {
    tokens: RwLock<HashMap<String, Identity>>,
}

impl TokenDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for an identity. Replaces any previous holder.
    pub fn insert(&self, token: impl Into<String>, identity: Identity) {
        self.tokens.write().insert(token.into(), identity);
    }

    /// Invalidate a token. Existing connections are unaffected.
    pub fn revoke(&self, token: &str) {
        self.tokens.write().remove(token);
    }
}

impl Authenticator for TokenDirectory {
    fn authenticate(&self, credential: &str) -> Result<Identity> {
        if credential.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "credential required".to_string(),
            ));
        }
        self.tokens
            .read()
            .get(credential)
            .cloned()
            .ok_or_else(|| RealtimeError::AuthenticationFailed("unknown credential".to_string()))
    }
}
