//! Identity verification
//!
//! Bearer credentials are opaque to this service; an identity provider
//! turns them into a stable user id. Handlers receive the verified identity
//! through the `AuthenticatedUser` extractor, which rejects the request
//! before any entitlement lookup happens.

mod extractor;
mod verifier;

pub use extractor::{bearer_token, AuthenticatedUser};
pub use verifier::{IdentityVerifier, RemoteIdentityVerifier, StaticIdentityVerifier};

use thiserror::Error;

/// Identity errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Identity provider failure: {0}")]
    Provider(String),
}

/// Identity yielded by a successful verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub user_id: String,
    pub email: Option<String>,
}
