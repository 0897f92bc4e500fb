use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};

use crate::auth::{RequireSession, generate_application_secret};
use crate::server::AppState;
use crate::server::dto::{ApplicationCredentials, ApplicationSummary, CreateApplicationRequest};
use crate::server::response::{ApiError, ListResponse, StoreResultExt};
use crate::server::validation::validate_application_key;

/// Creates the identity on first call; later calls rename it and return the
/// existing secret unchanged.
pub async fn upsert_application(
    session: RequireSession,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateApplicationRequest>,
) -> impl IntoResponse {
    let key = req.key.trim();
    validate_application_key(key)?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Application name is required"));
    }

    let identity = state
        .store
        .upsert_application(key, name, &generate_application_secret())
        .api_err("Failed to save application")?;

    tracing::info!(
        "Application {} registered by {}",
        identity.key,
        session.operator.name
    );

    Ok(Json(ApplicationCredentials {
        key: identity.key,
        name: identity.name,
        secret: identity.secret,
    }))
}

pub async fn list_applications(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let applications = state
        .store
        .list_applications()
        .api_err("Failed to list applications")?;

    let list = applications
        .into_iter()
        .map(|a| ApplicationSummary {
            key: a.key,
            name: a.name,
        })
        .collect();

    Ok::<_, ApiError>(Json(ListResponse::<ApplicationSummary>::new(list)))
}
