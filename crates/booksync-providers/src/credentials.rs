//! Owner credentials for providers.
//!
//! Providers are stateless; tokens are supplied from outside through a
//! [`CredentialSource`]. How tokens are obtained and refreshed is up to the
//! embedding application.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use booksync_core::OwnerId;

/// Supplies access tokens per owner.
pub trait CredentialSource: Send + Sync {
    /// Returns the current access token for `owner`, if connected.
    fn access_token(&self, owner: &OwnerId) -> Option<String>;

    /// Returns true if `owner` is connected.
    fn has_credentials(&self, owner: &OwnerId) -> bool {
        self.access_token(owner).is_some()
    }
}

/// In-memory token table that can be updated at runtime.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    tokens: RwLock<HashMap<OwnerId, String>>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a token.
    #[must_use]
    pub fn with_token(self, owner: OwnerId, token: impl Into<String>) -> Self {
        self.set_token(owner, token);
        self
    }

    /// Stores or replaces the token of `owner`.
    pub fn set_token(&self, owner: OwnerId, token: impl Into<String>) {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(owner, token.into());
    }

    /// Forgets the token of `owner`. Returns true if one was stored.
    pub fn revoke(&self, owner: &OwnerId) -> bool {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(owner)
            .is_some()
    }
}

impl CredentialSource for StaticCredentials {
    fn access_token(&self, owner: &OwnerId) -> Option<String> {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(owner)
            .filter(|t| !t.is_empty())
            .cloned()
    }
}
