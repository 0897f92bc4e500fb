use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};

use crate::auth::{RequireSession, SignedJson};
use crate::server::AppState;
use crate::server::dto::{
    ApplicationKeyParams, RegisterRequest, RegisterResponse, SetEnabledRequest,
};
use crate::server::response::{ApiError, ListResponse, StoreResultExt};
use crate::types::PermissionDefinition;

/// POST /register - signed bulk registration from an application.
///
/// Entries outside the caller's `<key>:` namespace are dropped. Survivors are
/// upserted and forced enabled.
pub async fn register_permissions(
    State(state): State<Arc<AppState>>,
    SignedJson { app, payload }: SignedJson<RegisterRequest>,
) -> impl IntoResponse {
    let prefix = format!("{}:", app.key);
    let submitted = payload.list.len();

    let permissions: Vec<PermissionDefinition> = payload
        .list
        .into_iter()
        .filter_map(|p| {
            let code = p.code?.trim().to_string();
            let name = p.name?.trim().to_string();
            if code.is_empty() || name.is_empty() || !code.starts_with(&prefix) {
                return None;
            }
            Some(PermissionDefinition {
                code,
                name,
                application_key: app.key.clone(),
                is_enabled: true,
            })
        })
        .collect();

    if permissions.is_empty() {
        tracing::warn!(
            "Application {} registered no permissions in its namespace ({} submitted)",
            app.key,
            submitted
        );
        return Err(ApiError::bad_request(format!(
            "No valid permissions with prefix '{prefix}'"
        )));
    }
    if permissions.len() < submitted {
        tracing::warn!(
            "Dropped {} permission(s) from {}",
            submitted - permissions.len(),
            app.key
        );
    }

    state
        .store
        .upsert_permissions(&permissions)
        .api_err("Failed to save permissions")?;

    tracing::info!("Registered {} permission(s) for {}", permissions.len(), app.key);

    Ok(Json(RegisterResponse {
        is_success: true,
        count: permissions.len(),
    }))
}

pub async fn list_permissions(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ApplicationKeyParams>,
) -> impl IntoResponse {
    let permissions = state
        .store
        .list_permissions(params.application_key.trim())
        .api_err("Failed to list permissions")?;

    Ok::<_, ApiError>(Json(ListResponse::new(permissions)))
}

pub async fn set_permission_enabled(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetEnabledRequest>,
) -> impl IntoResponse {
    let count = state
        .store
        .set_permission_enabled(req.code.trim(), req.is_enabled)
        .api_err("Failed to update permission")?;

    if count == 0 {
        return Err(ApiError::not_found("Permission not found"));
    }

    Ok(Json(RegisterResponse {
        is_success: true,
        count,
    }))
}
