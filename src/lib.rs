//! # Tokengate
//!
//! JWT session engine for two principal kinds, users and admins.
//!
//! ## Tokens
//!
//! Every principal owns a random secret. Access and refresh tokens are `HS256`
//! JWTs signed with that secret, and each issued token is recorded as a member
//! of the principal's session set. A token is accepted only when its signature
//! verifies against the current secret and it is still a member of the set.
//!
//! - **Logout** removes one token from the set.
//! - **Logout-all** and **revocation** delete the secret, so every token signed
//!   with it stops verifying at once.
//! - **Refresh** rotates the pair: the presented refresh token is removed as
//!   soon as the new pair exists.
//!
//! ## Login throttle
//!
//! Failed passwords are counted per `(user, ip, entity)` in a sliding window.
//! Once the window holds too many failures the login is refused before the
//! password is compared.
//!
//! ## Layout
//!
//! - [`session`]: the engine, independent of HTTP and storage.
//! - [`storage`]: in-memory and Postgres backends.
//! - [`api`]: axum routes, signed refresh cookie, `OpenAPI` document.
//! - [`cli`]: arguments, telemetry and the server action.

pub mod api;
pub mod cli;
pub mod session;
pub mod storage;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
