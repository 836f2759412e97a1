//! HS256 access and refresh tokens.
//!
//! Flow Overview:
//! 1) Serialize `{userId, uuid, role, typ, iat, exp}` and a fixed `HS256` header.
//! 2) Sign `base64url(header).base64url(claims)` with the caller's per-principal
//!    secret.
//! 3) On verify, check structure, algorithm and signature first, then the token
//!    kind, then `exp`.
//!
//! Expired and invalid tokens are distinct errors: callers clean up cache state
//! for the former and leave it untouched for the latter. A forged token is always
//! invalid, even when its claimed `exp` has passed.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "HS256";

/// Payload shared by access and refresh tokens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenContent {
    pub user_id: i64,
    /// Unique per issuance so sibling sessions never produce the same token.
    pub uuid: String,
    pub role: i64,
}

impl TokenContent {
    #[must_use]
    pub fn new(user_id: i64, role: i64) -> Self {
        Self {
            user_id,
            uuid: Uuid::new_v4().to_string(),
            role,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Expiry profile for one token kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenProfile {
    kind: TokenKind,
    ttl: Duration,
}

impl TokenProfile {
    #[must_use]
    pub const fn access(ttl: Duration) -> Self {
        Self {
            kind: TokenKind::Access,
            ttl,
        }
    }

    #[must_use]
    pub const fn refresh(ttl: Duration) -> Self {
        Self {
            kind: TokenKind::Refresh,
            ttl,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> TokenKind {
        self.kind
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(flatten)]
    pub content: TokenContent,
    pub typ: TokenKind,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signing key")]
    InvalidKey,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token kind mismatch")]
    WrongKind,
    #[error("invalid token ttl")]
    InvalidTtl,
    #[error("token expired")]
    Expired,
}

impl TokenError {
    #[must_use]
    pub const fn is_expired(&self) -> bool {
        matches!(self, Self::Expired)
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn mac(secret: &[u8], signing_input: &str) -> Result<HmacSha256, TokenError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| TokenError::InvalidKey)?;
    mac.update(signing_input.as_bytes());
    Ok(mac)
}

fn split(token: &str) -> Result<(&str, &str, &str), TokenError> {
    let mut parts = token.split('.');
    let header = parts.next().ok_or(TokenError::TokenFormat)?;
    let claims = parts.next().ok_or(TokenError::TokenFormat)?;
    let signature = parts.next().ok_or(TokenError::TokenFormat)?;
    if parts.next().is_some() || header.is_empty() || claims.is_empty() || signature.is_empty() {
        return Err(TokenError::TokenFormat);
    }
    Ok((header, claims, signature))
}

/// Sign `content` for `profile` at `now_unix_seconds`.
///
/// # Errors
/// Returns an error if the ttl does not fit a timestamp or encoding fails.
pub fn sign_hs256(
    content: &TokenContent,
    profile: TokenProfile,
    secret: &[u8],
    now_unix_seconds: i64,
) -> Result<String, TokenError> {
    let ttl = i64::try_from(profile.ttl.as_secs()).map_err(|_| TokenError::InvalidTtl)?;
    let exp = now_unix_seconds
        .checked_add(ttl)
        .ok_or(TokenError::InvalidTtl)?;
    let claims = TokenClaims {
        content: content.clone(),
        typ: profile.kind,
        iat: now_unix_seconds,
        exp,
    };

    let header_b64 = b64e_json(&TokenHeader::hs256())?;
    let claims_b64 = b64e_json(&claims)?;
    let signing_input = format!("{header_b64}.{claims_b64}");
    let signature = mac(secret, &signing_input)?.finalize().into_bytes();
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature);

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Verify `token` against `profile` and return its claims.
///
/// # Errors
/// - `TokenError::Expired` when the signature is valid but `exp` has passed.
/// - Any other variant when the token is malformed, forged, or of the wrong kind.
pub fn verify_hs256(
    token: &str,
    profile: TokenProfile,
    secret: &[u8],
    now_unix_seconds: i64,
) -> Result<TokenClaims, TokenError> {
    let (header_b64, claims_b64, signature_b64) = split(token)?;

    let header: TokenHeader = b64d_json(header_b64)?;
    if header.alg != ALGORITHM {
        return Err(TokenError::UnsupportedAlg(header.alg));
    }

    let signature =
        Base64UrlUnpadded::decode_vec(signature_b64).map_err(|_| TokenError::Base64)?;
    mac(secret, &format!("{header_b64}.{claims_b64}"))?
        .verify_slice(&signature)
        .map_err(|_| TokenError::InvalidSignature)?;

    let claims: TokenClaims = b64d_json(claims_b64)?;
    if claims.typ != profile.kind {
        return Err(TokenError::WrongKind);
    }
    if claims.exp <= now_unix_seconds {
        return Err(TokenError::Expired);
    }

    Ok(claims)
}

/// Decode claims without checking the signature.
///
/// Only used to find which principal's secret to verify against; nothing read
/// here is trusted until `verify_hs256` succeeds.
///
/// # Errors
/// Returns an error if the token is not structurally a JWT.
pub fn peek_claims(token: &str) -> Result<TokenClaims, TokenError> {
    let (_, claims_b64, _) = split(token)?;
    b64d_json(claims_b64)
}

#[must_use]
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Signs and verifies both token kinds with their configured lifetimes.
#[derive(Clone, Copy, Debug)]
pub struct TokenIssuer {
    access: TokenProfile,
    refresh: TokenProfile,
}

impl TokenIssuer {
    #[must_use]
    pub const fn new(access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            access: TokenProfile::access(access_ttl),
            refresh: TokenProfile::refresh(refresh_ttl),
        }
    }

    #[must_use]
    pub const fn profile(&self, kind: TokenKind) -> TokenProfile {
        match kind {
            TokenKind::Access => self.access,
            TokenKind::Refresh => self.refresh,
        }
    }

    /// # Errors
    /// See [`sign_hs256`].
    pub fn sign(
        &self,
        content: &TokenContent,
        kind: TokenKind,
        secret: &[u8],
    ) -> Result<String, TokenError> {
        sign_hs256(content, self.profile(kind), secret, unix_now())
    }

    /// # Errors
    /// See [`verify_hs256`].
    pub fn verify(
        &self,
        token: &str,
        kind: TokenKind,
        secret: &[u8],
    ) -> Result<TokenContent, TokenError> {
        verify_hs256(token, self.profile(kind), secret, unix_now()).map(|claims| claims.content)
    }
}
