use thiserror::Error;

/// Failure kinds surfaced by the session engine.
///
/// The HTTP layer is the only place these become status codes; see
/// `api::handlers::error`.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credential record matches the username")]
    UserNotFound,
    #[error("password does not match")]
    IncorrectPassword,
    #[error("principal is revoked")]
    Revoked,
    #[error("too many failed login attempts")]
    TooManyAttempts,
    #[error("token expired")]
    TokenExpired,
    #[error("token revoked")]
    TokenRevoked,
    #[error("token invalid")]
    TokenInvalid,
    #[error("authorization header missing")]
    HeadersEmpty,
    #[error("entity not found")]
    EntityNotFound,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// Stable machine-readable kind, serialized as `{"message": kind}`.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::IncorrectPassword => "USER_INCORRECT_PASSWORD",
            Self::Revoked => "USER_REVOKED",
            Self::TooManyAttempts => "USER_TOO_MANY_ATTEMPTS",
            Self::TokenExpired => "AUTH_TOKEN_EXPIRED",
            Self::TokenRevoked => "AUTH_TOKEN_REVOKED",
            Self::TokenInvalid => "AUTH_TOKEN_INVALID",
            Self::HeadersEmpty => "AUTH_HEADERS_EMPTY",
            Self::EntityNotFound => "ENTITY_NOT_FOUND",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Errors that can be cured by retrying the same call.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}
