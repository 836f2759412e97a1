//! Credential records and password verification.
//!
//! Flow Overview:
//! 1) Look the username up in the entity's credential table.
//! 2) Refuse early when the `(user_id, ip, entity)` triple is throttled, before
//!    any hash work is spent.
//! 3) Compare the password against the stored Argon2 PHC string on the blocking
//!    pool. A mismatch is recorded with the throttle.
//! 4) Only then check the revoked flag, so a revoked account does not leak its
//!    state to someone without the password.
//!
//! The password hash never leaves this module; callers get a [`PublicUser`].

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::SaltString, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::ToSchema;

use super::{
    entity::EntityKind, error::AuthError, throttle::LoginThrottle, token::TokenContent,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: i64,
    pub name: String,
}

/// Row of the `User` or `Admin` table joined with its role.
#[derive(Clone, Debug)]
pub struct CredentialRecord {
    pub id: i64,
    pub username: String,
    pub password_hash: SecretString,
    pub role: Role,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    #[must_use]
    pub fn public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            username: self.username.clone(),
            role: self.role.clone(),
            revoked: self.revoked,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Credential record as returned to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read access to credential tables, plus the revoke flag.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_username(
        &self,
        entity: EntityKind,
        username: &str,
    ) -> Result<Option<CredentialRecord>>;

    async fn find_by_id(&self, entity: EntityKind, id: i64) -> Result<Option<CredentialRecord>>;

    /// Returns `false` when no record has that id.
    async fn set_revoked(&self, entity: EntityKind, id: i64, revoked: bool) -> Result<bool>;
}

/// Successful credential check.
#[derive(Clone, Debug)]
pub struct VerifiedLogin {
    pub content: TokenContent,
    pub user: PublicUser,
}

#[derive(Clone)]
pub struct CredentialVerifier {
    store: Arc<dyn CredentialStore>,
    throttle: Arc<dyn LoginThrottle>,
}

impl CredentialVerifier {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, throttle: Arc<dyn LoginThrottle>) -> Self {
        Self { store, throttle }
    }

    /// Check a username/password pair for `entity`.
    ///
    /// # Errors
    /// `UserNotFound`, `TooManyAttempts`, `IncorrectPassword` or `Revoked`, in
    /// that order of precedence. Store failures surface as `Internal`.
    #[instrument(skip(self, password), fields(%entity))]
    pub async fn verify(
        &self,
        entity: EntityKind,
        username: &str,
        password: &str,
        ip: &str,
    ) -> Result<VerifiedLogin, AuthError> {
        let Some(record) = self.store.find_by_username(entity, username).await? else {
            debug!("unknown username");
            return Err(AuthError::UserNotFound);
        };

        if self.throttle.is_blocked(record.id, ip, entity) {
            debug!(user_id = record.id, "login throttled");
            return Err(AuthError::TooManyAttempts);
        }

        if !password_matches(password, &record.password_hash).await? {
            self.throttle.record_failure(record.id, ip, entity);
            return Err(AuthError::IncorrectPassword);
        }

        if record.revoked {
            return Err(AuthError::Revoked);
        }

        Ok(VerifiedLogin {
            content: TokenContent::new(record.id, record.role.id),
            user: record.public(),
        })
    }
}

async fn password_matches(password: &str, hash: &SecretString) -> Result<bool> {
    let password = password.to_owned();
    let hash = hash.clone();
    tokio::task::spawn_blocking(move || verify_password(&password, hash.expose_secret()))
        .await
        .context("password verification task failed")?
}

/// Compare `password` with a PHC-formatted Argon2 hash.
///
/// Parameters are read from the hash itself.
///
/// # Errors
/// Returns an error if the stored hash cannot be parsed.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored_hash).map_err(|_| anyhow!("invalid password hash"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Hash a password with Argon2id default parameters.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(password: &str) -> Result<String> {
    hash_password_with(password, Params::default())
}

/// Hash a password with explicit Argon2id cost parameters.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password_with(password: &str, params: Params) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|_| anyhow!("failed to hash password"))?
        .to_string();
    Ok(hash)
}
