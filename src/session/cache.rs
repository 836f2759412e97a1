//! Per-principal signing secrets and live-token membership.
//!
//! Every principal signs all of its tokens with one random secret stored under
//! `${entity}:${user_id}`. Deleting the secret revokes every token at once.
//! Single-device logout removes one token from the principal's membership set;
//! sibling tokens signed with the same secret stay valid.
//!
//! Membership keys are SHA-256 hashes of the token, never the raw value.
//!
//! Implementations live in `crate::storage`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

use super::entity::EntityKind;

const SECRET_BYTES: usize = 32;

/// Symmetric key for one principal's tokens.
#[derive(Clone)]
pub struct UserSecret(SecretString);

impl UserSecret {
    /// Generate a fresh random secret.
    ///
    /// # Errors
    /// Returns an error if the OS random source fails.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; SECRET_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .context("failed to generate signing secret")?;
        Ok(Self(SecretString::from(Base64::encode_string(&bytes))))
    }

    #[must_use]
    pub fn from_encoded(encoded: String) -> Self {
        Self(SecretString::from(encoded))
    }

    /// Key material handed to the HMAC.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.0.expose_secret().as_bytes()
    }

    pub(crate) fn encoded(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for UserSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UserSecret([REDACTED])")
    }
}

impl PartialEq for UserSecret {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

/// Hash a token so raw values never reach the cache.
#[must_use]
pub fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Key-value store for secrets and token membership, one namespace pair per
/// entity kind.
#[async_trait]
pub trait SessionCache: Send + Sync {
    /// Return the live secret or atomically create one.
    ///
    /// Either way the secret's expiry is pushed to at least `now + ttl`, so it
    /// never expires before a token signed with it. Two concurrent callers for
    /// the same principal always receive the same secret.
    async fn get_or_create_secret(
        &self,
        entity: EntityKind,
        user_id: i64,
        ttl: Duration,
    ) -> Result<UserSecret>;

    /// Return the live secret, if any. Expired secrets read as absent.
    async fn get_secret(&self, entity: EntityKind, user_id: i64) -> Result<Option<UserSecret>>;

    /// Drop the secret and every token membership of the principal.
    async fn delete_secret(&self, entity: EntityKind, user_id: i64) -> Result<()>;

    /// Register a token as live for `ttl`.
    ///
    /// # Errors
    /// Fails when the principal has no live secret.
    async fn store_token(
        &self,
        entity: EntityKind,
        user_id: i64,
        token: &str,
        ttl: Duration,
    ) -> Result<()>;

    async fn has_token(&self, entity: EntityKind, user_id: i64, token: &str) -> Result<bool>;

    /// Remove exactly one token. Missing tokens are not an error.
    async fn delete_token(&self, entity: EntityKind, user_id: i64, token: &str) -> Result<()>;
}
