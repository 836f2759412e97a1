//! Token and session lifecycle engine.
//!
//! One engine serves both entity kinds. Collaborators are injected behind
//! traits: [`CredentialStore`] for credential records, [`SessionCache`] for
//! per-principal secrets and token membership, [`LoginThrottle`] for failed
//! login accounting.

pub mod cache;
pub mod config;
pub mod credentials;
pub mod entity;
pub mod error;
pub mod service;
pub mod throttle;
pub mod token;

pub use cache::{SessionCache, UserSecret};
pub use config::SessionConfig;
pub use credentials::{
    hash_password, hash_password_with, CredentialRecord, CredentialStore, CredentialVerifier,
    PublicUser, Role,
};
pub use entity::EntityKind;
pub use error::AuthError;
pub use service::{IssuedSession, SessionContext, SessionService};
pub use throttle::{LoginThrottle, SlidingWindowThrottle, ThrottlePolicy};
pub use token::{TokenContent, TokenIssuer, TokenKind};
