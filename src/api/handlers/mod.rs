pub mod admin;
pub mod auth;
pub mod error;
pub mod health;

// common functions for the handlers
use axum::{
    extract::ConnectInfo,
    http::{header::AUTHORIZATION, HeaderMap},
};
use regex::Regex;
use std::net::SocketAddr;

use crate::session::AuthError;

const PASSWORD_MIN_CHARS: usize = 12;
const PASSWORD_MAX_CHARS: usize = 64;

pub fn valid_username(username: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9_.\-]{5,32}$").is_ok_and(|re| re.is_match(username))
}

pub fn valid_password(password: &str) -> bool {
    (PASSWORD_MIN_CHARS..=PASSWORD_MAX_CHARS).contains(&password.chars().count())
}

/// Length and charset checks applied before any lookup.
pub(crate) fn validate_credentials(username: &str, password: &str) -> Result<(), AuthError> {
    if !valid_username(username) {
        return Err(AuthError::Validation("username".to_string()));
    }
    if !valid_password(password) {
        return Err(AuthError::Validation("password".to_string()));
    }
    Ok(())
}

/// Token from `Authorization: Bearer <token>`, if any.
pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Client address used as the throttle key.
///
/// `X-Forwarded-For` and `X-Real-IP` are client-controlled unless a proxy
/// overwrites them, so they are read only when `trust_proxy_headers` is set.
/// Otherwise the socket address is used.
pub(crate) fn client_ip(
    headers: &HeaderMap,
    connect: Option<&ConnectInfo<SocketAddr>>,
    trust_proxy_headers: bool,
) -> String {
    let socket_ip =
        || connect.map_or_else(|| "unknown".to_string(), |info| info.0.ip().to_string());
    if !trust_proxy_headers {
        return socket_ip();
    }
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }
    socket_ip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn username_rules() {
        assert!(valid_username("alice_01"));
        assert!(valid_username("a.b-c"));
        assert!(!valid_username("abcd"));
        assert!(!valid_username(&"a".repeat(33)));
        assert!(!valid_username("alice bob"));
    }

    #[test]
    fn password_rules_count_characters() {
        assert!(valid_password("correct horse"));
        assert!(!valid_password("short"));
        assert!(!valid_password(&"x".repeat(65)));
        // Twelve two-byte characters.
        assert!(valid_password(&"é".repeat(12)));
    }

    #[test]
    fn validation_names_the_field() {
        assert!(matches!(
            validate_credentials("abc", "correct horse"),
            Err(AuthError::Validation(field)) if field == "username"
        ));
        assert!(matches!(
            validate_credentials("alice_01", "short"),
            Err(AuthError::Validation(field)) if field == "password"
        ));
        assert!(validate_credentials("alice_01", "correct horse").is_ok());
    }

    #[test]
    fn bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer_token(&headers).is_none());
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(extract_bearer_token(&headers).as_deref(), Some("abc.def.ghi"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert!(extract_bearer_token(&headers).is_none());
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert!(extract_bearer_token(&headers).is_none());
    }

    #[test]
    fn client_ip_ignores_proxy_headers_by_default() {
        let socket = ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000)));
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, None, false), "unknown");
        assert_eq!(client_ip(&headers, Some(&socket), false), "192.0.2.1");
    }

    #[test]
    fn client_ip_reads_trusted_proxy_headers() {
        let socket = ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000)));
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(&socket), true), "192.0.2.1");

        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers, Some(&socket), true), "198.51.100.2");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, Some(&socket), true), "203.0.113.9");
    }
}
