//! Signed refresh-token cookie.
//!
//! The cookie value is `token.signature` where the signature is
//! base64url(HMAC-SHA256(cookie secret, token)). The path is scoped to the
//! entity's auth routes so user and admin sessions never overwrite each other.

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{digest::InvalidLength, Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::session::EntityKind;

pub const REFRESH_COOKIE_NAME: &str = "refreshToken";

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct CookieSigner {
    key: HmacSha256,
    secure: bool,
}

impl CookieSigner {
    /// # Errors
    /// Returns an error if the secret is rejected as an HMAC key.
    pub fn new(secret: &SecretString, secure: bool) -> Result<Self, InvalidLength> {
        let key = <HmacSha256 as Mac>::new_from_slice(secret.expose_secret().as_bytes())?;
        Ok(Self { key, secure })
    }

    #[must_use]
    pub fn secure(&self) -> bool {
        self.secure
    }

    fn mac(&self, value: &str) -> HmacSha256 {
        let mut mac = self.key.clone();
        mac.update(value.as_bytes());
        mac
    }

    #[must_use]
    pub fn sign(&self, value: &str) -> String {
        let signature = self.mac(value).finalize().into_bytes();
        format!("{value}.{}", Base64UrlUnpadded::encode_string(&signature))
    }

    /// Return the original value when the signature matches.
    #[must_use]
    pub fn unsign(&self, signed: &str) -> Option<String> {
        let (value, signature) = signed.rsplit_once('.')?;
        let signature = Base64UrlUnpadded::decode_vec(signature).ok()?;
        self.mac(value).verify_slice(&signature).ok()?;
        Some(value.to_string())
    }

    /// `Set-Cookie` value carrying a signed refresh token.
    ///
    /// # Errors
    /// Returns an error if the cookie is not a valid header value.
    pub fn refresh_cookie(
        &self,
        entity: EntityKind,
        token: &str,
        max_age_seconds: u64,
    ) -> Result<HeaderValue, InvalidHeaderValue> {
        let value = self.sign(token);
        self.cookie(entity, &value, max_age_seconds)
    }

    /// `Set-Cookie` value that removes the refresh token.
    ///
    /// # Errors
    /// Returns an error if the cookie is not a valid header value.
    pub fn clear_refresh_cookie(&self, entity: EntityKind) -> Result<HeaderValue, InvalidHeaderValue> {
        self.cookie(entity, "", 0)
    }

    fn cookie(
        &self,
        entity: EntityKind,
        value: &str,
        max_age_seconds: u64,
    ) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!(
            "{REFRESH_COOKIE_NAME}={value}; Path=/v1/auth/{entity}; HttpOnly; SameSite=Strict; Max-Age={max_age_seconds}"
        );
        // Only mark cookies secure when the frontend is served over HTTPS.
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }
}

/// Read a cookie value from the request headers.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let Some((key, val)) = pair.trim().split_once('=') else {
                continue;
            };
            if key.trim() == name {
                return Some(val.trim().to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer(secure: bool) -> CookieSigner {
        let secret = SecretString::from("cookie-secret".to_string());
        CookieSigner::new(&secret, secure).unwrap_or_else(|err| panic!("{err}"))
    }

    #[test]
    fn signed_values_round_trip() {
        let signer = signer(true);
        let signed = signer.sign("header.claims.signature");
        assert_eq!(
            signer.unsign(&signed).as_deref(),
            Some("header.claims.signature")
        );
    }

    #[test]
    fn tampered_values_are_rejected() -> anyhow::Result<()> {
        let signer = signer(true);
        let signed = signer.sign("a.b.c");
        let tampered = signed.replacen("a.", "x.", 1);
        assert!(signer.unsign(&tampered).is_none());
        assert!(signer.unsign("a.b.c").is_none());
        assert!(signer.unsign("no-signature").is_none());

        let other = CookieSigner::new(&SecretString::from("other".to_string()), true)
            .map_err(|err| anyhow::anyhow!("{err}"))?;
        assert!(other.unsign(&signed).is_none());
        Ok(())
    }

    #[test]
    fn cookie_attributes() -> anyhow::Result<()> {
        let cookie = signer(true).refresh_cookie(EntityKind::Admin, "a.b.c", 60)?;
        let cookie = cookie.to_str()?;
        assert!(cookie.starts_with("refreshToken=a.b.c."));
        assert!(cookie.contains("Path=/v1/auth/admin"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Max-Age=60"));
        assert!(cookie.ends_with("; Secure"));

        let cleared = signer(false).clear_refresh_cookie(EntityKind::User)?;
        let cleared = cleared.to_str()?;
        assert!(cleared.starts_with("refreshToken=;"));
        assert!(cleared.contains("Max-Age=0"));
        assert!(!cleared.contains("Secure"));
        Ok(())
    }

    #[test]
    fn reads_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; refreshToken=abc.def; other=1"),
        );
        assert_eq!(
            read_cookie(&headers, REFRESH_COOKIE_NAME).as_deref(),
            Some("abc.def")
        );
        assert!(read_cookie(&headers, "missing").is_none());
    }
}
