//! Login, refresh, logout and profile endpoints for both entity kinds.
//!
//! Flow Overview:
//! 1) `login` validates the body, checks credentials and returns the access
//!    token in JSON with the refresh token in a signed `HttpOnly` cookie.
//! 2) `refresh` reads that cookie, rotates the pair and resets the cookie.
//! 3) `logout`/`logout-all` need a bearer access token and always clear the
//!    cookie on success.
//! 4) `me` is the example protected route.

use anyhow::anyhow;
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Extension, Path},
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tracing::debug;
use utoipa::ToSchema;

use super::{client_ip, error::ErrorResponse, extract_bearer_token, validate_credentials};
use crate::{
    api::{
        cookie::{read_cookie, REFRESH_COOKIE_NAME},
        AppState,
    },
    session::{AuthError, EntityKind, IssuedSession, PublicUser, SessionContext, TokenKind},
};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: PublicUser,
    pub access_token: String,
    pub token_type: String,
}

/// Resolve `Authorization: Bearer` into a verified access context.
pub(crate) async fn authenticate_bearer(
    state: &AppState,
    entity: EntityKind,
    headers: &HeaderMap,
) -> Result<SessionContext, AuthError> {
    let token = extract_bearer_token(headers);
    state
        .sessions()
        .authenticate(entity, token.as_deref(), TokenKind::Access)
        .await
}

fn header_error(err: axum::http::header::InvalidHeaderValue) -> AuthError {
    AuthError::Internal(anyhow!(err).context("failed to build refresh cookie"))
}

fn session_response(
    state: &AppState,
    entity: EntityKind,
    session: IssuedSession,
) -> Result<Response, AuthError> {
    let max_age = state.sessions().config().refresh_token_ttl_seconds();
    let cookie = state
        .cookies()
        .refresh_cookie(entity, &session.refresh_token, max_age)
        .map_err(header_error)?;
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);
    let body = LoginResponse {
        user: session.user,
        access_token: session.access_token,
        token_type: "Bearer".to_string(),
    };
    Ok((StatusCode::OK, headers, Json(body)).into_response())
}

fn cleared_cookie(state: &AppState, entity: EntityKind) -> Result<HeaderMap, AuthError> {
    let cookie: HeaderValue = state
        .cookies()
        .clear_refresh_cookie(entity)
        .map_err(header_error)?;
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);
    Ok(headers)
}

/// Refresh token carried by the signed cookie.
///
/// Missing or empty cookies are `HeadersEmpty`; a bad signature is `TokenInvalid`.
fn refresh_token_from_cookie(state: &AppState, headers: &HeaderMap) -> Result<String, AuthError> {
    let signed = read_cookie(headers, REFRESH_COOKIE_NAME)
        .filter(|value| !value.is_empty())
        .ok_or(AuthError::HeadersEmpty)?;
    state
        .cookies()
        .unsign(&signed)
        .ok_or(AuthError::TokenInvalid)
}

#[utoipa::path(
    post,
    path = "/v1/auth/{entity}/login",
    params(("entity" = EntityKind, Path, description = "Principal kind")),
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in; refresh token set as cookie", body = LoginResponse),
        (status = 400, description = "Invalid username or password format", body = ErrorResponse),
        (status = 401, description = "Credentials rejected or login throttled", body = ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn login(
    Path(entity): Path<EntityKind>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    state: Extension<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, AuthError> {
    let Json(request) = payload.map_err(|err| {
        debug!("Invalid login body: {err}");
        AuthError::Validation("body".to_string())
    })?;
    validate_credentials(&request.username, &request.password)?;

    let ip = client_ip(&headers, connect.as_ref(), state.trusts_proxy_headers());
    let session = state
        .sessions()
        .login(entity, &request.username, &request.password, &ip)
        .await?;
    session_response(&state, entity, session)
}

#[utoipa::path(
    post,
    path = "/v1/auth/{entity}/refresh",
    params(("entity" = EntityKind, Path, description = "Principal kind")),
    responses(
        (status = 200, description = "New token pair issued", body = LoginResponse),
        (status = 401, description = "Refresh cookie missing, expired or revoked", body = ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn refresh(
    Path(entity): Path<EntityKind>,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Response, AuthError> {
    let token = refresh_token_from_cookie(&state, &headers)?;
    let ctx = state
        .sessions()
        .authenticate(entity, Some(&token), TokenKind::Refresh)
        .await?;
    let session = state.sessions().refresh(&ctx).await?;
    session_response(&state, entity, session)
}

#[utoipa::path(
    post,
    path = "/v1/auth/{entity}/logout",
    params(("entity" = EntityKind, Path, description = "Principal kind")),
    responses(
        (status = 204, description = "Current session ended"),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn logout(
    Path(entity): Path<EntityKind>,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Response, AuthError> {
    let ctx = authenticate_bearer(&state, entity, &headers).await?;
    state.sessions().logout(&ctx).await?;

    // The refresh token of this device goes too, when the browser sent it.
    if let Ok(token) = refresh_token_from_cookie(&state, &headers) {
        state.sessions().discard_token(entity, &token).await?;
    }

    Ok((StatusCode::NO_CONTENT, cleared_cookie(&state, entity)?).into_response())
}

#[utoipa::path(
    post,
    path = "/v1/auth/{entity}/logout-all",
    params(("entity" = EntityKind, Path, description = "Principal kind")),
    responses(
        (status = 204, description = "Every session of the principal ended"),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn logout_all(
    Path(entity): Path<EntityKind>,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Response, AuthError> {
    let ctx = authenticate_bearer(&state, entity, &headers).await?;
    state.sessions().logout_all(&ctx).await?;
    Ok((StatusCode::NO_CONTENT, cleared_cookie(&state, entity)?).into_response())
}

#[utoipa::path(
    get,
    path = "/v1/auth/{entity}/me",
    params(("entity" = EntityKind, Path, description = "Principal kind")),
    responses(
        (status = 200, description = "Authenticated principal", body = PublicUser),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn me(
    Path(entity): Path<EntityKind>,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Json<PublicUser>, AuthError> {
    let ctx = authenticate_bearer(&state, entity, &headers).await?;
    Ok(Json(state.sessions().current_user(&ctx).await?))
}
