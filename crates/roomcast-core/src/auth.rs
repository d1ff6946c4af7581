//! Bearer-token verification.
//!
//! Authentication happens once per connection: the verifier turns an opaque
//! credential into an [`Identity`] or a distinct [`AuthError`]. Credential
//! issuance lives elsewhere; this module only validates already-issued
//! tokens against the configured trust key material.

use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// An authenticated identity.
///
/// Derived once from a verified token at connection time and immutable for
/// the lifetime of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque user id (the token's subject).
    pub user_id: String,
    /// Human-readable display name.
    pub display_name: String,
}

/// Authentication failures, each distinct and surfaced verbatim.
///
/// Any of these during the initial handshake is fatal to the connection
/// attempt; no partial session is retained.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential was presented.
    #[error("Missing credential")]
    MissingToken,

    /// Credential is not well-formed, has a bad signature, or carries the
    /// wrong issuer.
    #[error("Malformed credential: {0}")]
    Malformed(String),

    /// Credential is past its expiry.
    #[error("Credential expired")]
    Expired,

    /// The claimed identity no longer resolves to an account.
    #[error("Identity no longer resolves: {0}")]
    UnknownIdentity(String),

    /// Key material or account lookup was unavailable.
    #[error("Verifier unavailable: {0}")]
    Unavailable(String),

    /// Authentication did not complete within the handshake window.
    #[error("Authentication timed out")]
    Timeout,
}

/// Validates a bearer credential and yields the identity it encodes.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify a credential.
    ///
    /// # Errors
    ///
    /// Returns the specific [`AuthError`] for a missing, malformed,
    /// expired, or unresolvable credential.
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Oracle for whether a claimed identity still resolves to an account.
///
/// The account store is an external collaborator; this trait is its only
/// surface the verifier needs (e.g. to reject tokens of deleted accounts).
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Whether an account for `user_id` currently exists.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unavailable`] if the account store cannot be
    /// reached.
    async fn resolves(&self, user_id: &str) -> Result<bool, AuthError>;
}

/// Claims expected in a bearer token.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// Subject, the user id.
    sub: String,
    /// Display name; falls back to the subject when absent.
    #[serde(default)]
    name: Option<String>,
    /// Expiry, unix seconds.
    exp: i64,
}

/// JWT verifier over an HS256 shared secret.
///
/// Pure with respect to (token, current time, key material); the optional
/// [`IdentityResolver`] adds the account-existence check.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
    resolver: Option<Arc<dyn IdentityResolver>>,
}

impl JwtVerifier {
    /// Create a verifier trusting the given shared secret.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            resolver: None,
        }
    }

    /// Require tokens to carry this issuer.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        let issuer: String = issuer.into();
        self.validation.set_issuer(&[issuer]);
        self
    }

    /// Check claimed identities against an account oracle.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let data =
            decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
                match e.kind() {
                    ErrorKind::ExpiredSignature => AuthError::Expired,
                    _ => AuthError::Malformed(e.to_string()),
                }
            })?;
        let claims = data.claims;

        if let Some(resolver) = &self.resolver {
            if !resolver.resolves(&claims.sub).await? {
                return Err(AuthError::UnknownIdentity(claims.sub));
            }
        }

        debug!(user = %claims.sub, "Credential verified");

        let display_name = claims.name.unwrap_or_else(|| claims.sub.clone());
        Ok(Identity {
            user_id: claims.sub,
            display_name,
        })
    }
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("has_resolver", &self.resolver.is_some())
            .finish_non_exhaustive()
    }
}
