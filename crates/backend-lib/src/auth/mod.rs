// ============================
// crates/backend-lib/src/auth/mod.rs
// ============================
//! Bearer token authentication for the socket upgrade.

mod registry;
mod verifier;

pub use registry::TokenRegistry;
pub use verifier::{Identity, TokenVerifier};
