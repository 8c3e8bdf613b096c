// ============================
// crates/backend-lib/src/auth/verifier.rs
// ============================
use async_trait::async_trait;

/// The user a bearer token was issued to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
        }
    }
}

/// Resolves the bearer token presented on the socket upgrade.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// `None` when the token is unknown or expired
    async fn verify(&self, token: &str) -> Option<Identity>;
}
