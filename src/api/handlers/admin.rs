//! Admin-only record lookup and revocation.

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use std::sync::Arc;
use tracing::info;

use super::{auth::authenticate_bearer, error::ErrorResponse};
use crate::{
    api::AppState,
    session::{AuthError, EntityKind, PublicUser},
};

#[utoipa::path(
    get,
    path = "/v1/admin/{entity}/{id}",
    params(
        ("entity" = EntityKind, Path, description = "Principal kind"),
        ("id" = i64, Path, description = "Record id"),
    ),
    responses(
        (status = 200, description = "Record found", body = PublicUser),
        (status = 401, description = "Missing or invalid admin access token", body = ErrorResponse),
        (status = 404, description = "No record with that id", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn get_entity(
    Path((entity, id)): Path<(EntityKind, i64)>,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Json<PublicUser>, AuthError> {
    authenticate_bearer(&state, EntityKind::Admin, &headers).await?;
    Ok(Json(state.sessions().find_user(entity, id).await?))
}

#[utoipa::path(
    post,
    path = "/v1/admin/{entity}/{id}/revoke",
    params(
        ("entity" = EntityKind, Path, description = "Principal kind"),
        ("id" = i64, Path, description = "Record id"),
    ),
    responses(
        (status = 204, description = "Record revoked and its sessions ended"),
        (status = 401, description = "Missing or invalid admin access token", body = ErrorResponse),
        (status = 404, description = "No record with that id", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn revoke_entity(
    Path((entity, id)): Path<(EntityKind, i64)>,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<StatusCode, AuthError> {
    let admin = authenticate_bearer(&state, EntityKind::Admin, &headers).await?;
    state.sessions().revoke_user(entity, id).await?;
    info!(admin_id = admin.content.user_id, %entity, id, "revoked by admin");
    Ok(StatusCode::NO_CONTENT)
}
