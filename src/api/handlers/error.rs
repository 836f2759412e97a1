//! HTTP mapping for [`AuthError`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use crate::session::AuthError;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub message: String,
}

pub(crate) fn status_for(err: &AuthError) -> StatusCode {
    match err {
        AuthError::UserNotFound
        | AuthError::IncorrectPassword
        | AuthError::Revoked
        | AuthError::TooManyAttempts
        | AuthError::TokenExpired
        | AuthError::TokenRevoked
        | AuthError::TokenInvalid
        | AuthError::HeadersEmpty => StatusCode::UNAUTHORIZED,
        AuthError::Validation(_) => StatusCode::BAD_REQUEST,
        AuthError::EntityNotFound => StatusCode::NOT_FOUND,
        AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let Self::Internal(err) = &self {
            error!("Internal error: {err:#}");
        }
        let body = ErrorResponse {
            message: self.code().to_string(),
        };
        (status_for(&self), Json(body)).into_response()
    }
}
