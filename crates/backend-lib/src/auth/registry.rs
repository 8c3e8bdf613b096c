// ============================
// crates/backend-lib/src/auth/registry.rs
// ============================
//! Pre-provisioned bearer tokens. Tokens are minted by the account service;
//! this side only maps a presented token to the identity it was granted to.
use async_trait::async_trait;
use dashmap::DashMap;

use super::verifier::{Identity, TokenVerifier};
use crate::config::AuthSettings;

/// In-process token store
#[derive(Debug, Default)]
pub struct TokenRegistry {
    tokens: DashMap<String, Identity>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with the configured static tokens
    pub fn from_settings(settings: &AuthSettings) -> Self {
        let registry = Self::new();
        for (token, grant) in &settings.static_tokens {
            registry.insert_static(token, Identity::new(&grant.user_id, &grant.username));
        }
        tracing::debug!(tokens = registry.len(), "token registry seeded");
        registry
    }

    /// Register `token` for `identity`, replacing any earlier grant
    pub fn insert_static(&self, token: &str, identity: Identity) {
        self.tokens.insert(token.to_string(), identity);
    }

    pub fn lookup(&self, token: &str) -> Option<Identity> {
        self.tokens.get(token).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl TokenVerifier for TokenRegistry {
    async fn verify(&self, token: &str) -> Option<Identity> {
        self.lookup(token)
    }
}
