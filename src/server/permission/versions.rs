use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::auth::RequireSession;
use crate::server::AppState;
use crate::server::dto::{ApplicationKeyParams, PublishPermissionsRequest, VersionResponse};
use crate::server::response::{ApiError, StoreResultExt};
use crate::server::validation::validate_application_key;

/// Bumps the permission version. Not idempotent: each call adds one.
pub async fn publish_version(
    session: RequireSession,
    State(state): State<Arc<AppState>>,
    Json(req): Json<PublishPermissionsRequest>,
) -> impl IntoResponse {
    let key = req.application_key.trim();
    validate_application_key(key)?;

    let version = state
        .store
        .publish_permission_version(key)
        .api_err("Failed to publish permission version")?;

    tracing::info!(
        "Published permission version {} for {} ({})",
        version.number,
        key,
        session.operator.name
    );

    Ok::<_, ApiError>((
        StatusCode::CREATED,
        Json(VersionResponse {
            version: version.number.to_string(),
        }),
    ))
}

pub async fn get_version(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ApplicationKeyParams>,
) -> impl IntoResponse {
    let number = state
        .store
        .latest_permission_version(params.application_key.trim())
        .api_err("Failed to read permission version")?;

    Ok::<_, ApiError>(Json(VersionResponse {
        version: number.to_string(),
    }))
}
