use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::RequireSession;
use crate::server::AppState;
use crate::server::dto::{
    AssignRolesRequest, AssignRolesResponse, CreateRoleRequest, ListRolesParams,
    PermissionSetParams, SuccessResponse, UpdateRoleRequest, UserIdParams,
};
use crate::server::response::{ApiError, ListResponse, StoreOptionExt, StoreResultExt};
use crate::server::validation::validate_application_key;
use crate::types::{PermissionSet, Role, normalize_code};

/// Prefixes, sorts and deduplicates requested grants.
fn normalize_grants(application_key: &str, codes: &[String]) -> Vec<String> {
    let mut grants: Vec<String> = codes
        .iter()
        .map(|code| normalize_code(application_key, code))
        .filter(|code| !code.is_empty())
        .collect();
    grants.sort();
    grants.dedup();
    grants
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub async fn create_role(
    session: RequireSession,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRoleRequest>,
) -> impl IntoResponse {
    let application_key = req.application_key.trim();
    validate_application_key(application_key)?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Role name is required"));
    }

    let role = Role {
        id: Uuid::new_v4().to_string(),
        application_key: application_key.to_string(),
        name: name.to_string(),
        description: non_empty(req.description),
        permissions: normalize_grants(application_key, &req.permissions),
        created_at: Utc::now(),
    };

    state.store.create_role(&role).map_err(ApiError::from)?;

    tracing::info!(
        "Role {} created in {} with {} grant(s) by {}",
        role.name,
        role.application_key,
        role.permissions.len(),
        session.operator.name
    );

    Ok((StatusCode::CREATED, Json(role)))
}

pub async fn list_roles(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListRolesParams>,
) -> impl IntoResponse {
    let application_key = params
        .application_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty());

    let roles = state
        .store
        .list_roles(application_key)
        .api_err("Failed to list roles")?;

    Ok::<_, ApiError>(Json(ListResponse::new(roles)))
}

pub async fn get_role(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let role = state
        .store
        .get_role(&id)
        .api_err("Failed to get role")?
        .or_not_found("Role not found")?;

    Ok::<_, ApiError>(Json(role))
}

pub async fn update_role(
    session: RequireSession,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateRoleRequest>,
) -> impl IntoResponse {
    let mut role = state
        .store
        .get_role(&id)
        .api_err("Failed to get role")?
        .or_not_found("Role not found")?;

    if let Some(name) = req.name {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::bad_request("Role name cannot be empty"));
        }
        role.name = name.to_string();
    }
    if req.description.is_some() {
        role.description = non_empty(req.description);
    }
    if let Some(permissions) = req.permissions {
        role.permissions = normalize_grants(&role.application_key, &permissions);
    }

    if !state.store.update_role(&role).map_err(ApiError::from)? {
        return Err(ApiError::not_found("Role not found"));
    }

    tracing::info!(
        "Role {} in {} updated by {}",
        role.name,
        role.application_key,
        session.operator.name
    );

    Ok(Json(role))
}

pub async fn delete_role(
    session: RequireSession,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let deleted = state
        .store
        .delete_role(&id)
        .api_err("Failed to delete role")?;

    if !deleted {
        return Err(ApiError::not_found("Role not found"));
    }

    tracing::info!("Role {} deleted by {}", id, session.operator.name);

    Ok(Json(SuccessResponse { is_success: true }))
}

pub async fn list_user_roles(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
    Query(params): Query<UserIdParams>,
) -> impl IntoResponse {
    let user_id = params.user_id.trim();
    if user_id.is_empty() {
        return Err(ApiError::bad_request("userId is required"));
    }

    let roles = state
        .store
        .list_user_roles(user_id)
        .api_err("Failed to list user roles")?;

    Ok(Json(ListResponse::new(roles)))
}

/// PUT /user-roles - replace every role a user holds.
pub async fn assign_user_roles(
    session: RequireSession,
    State(state): State<Arc<AppState>>,
    Json(req): Json<AssignRolesRequest>,
) -> impl IntoResponse {
    let user_id = req.user_id.trim();
    if user_id.is_empty() {
        return Err(ApiError::bad_request("userId is required"));
    }

    let mut role_ids: Vec<String> = req
        .role_ids
        .iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    role_ids.sort();
    role_ids.dedup();

    state
        .store
        .set_user_roles(user_id, &role_ids)
        .map_err(ApiError::from)?;

    tracing::info!(
        "Assigned {} role(s) to {} ({})",
        role_ids.len(),
        user_id,
        session.operator.name
    );

    Ok(Json(AssignRolesResponse {
        assigned: role_ids.len(),
    }))
}

/// GET /permission-set - the enabled codes a user holds in one application,
/// tagged with the application's latest permission version.
pub async fn get_permission_set(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PermissionSetParams>,
) -> impl IntoResponse {
    let application_key = params.application_key.trim();
    validate_application_key(application_key)?;

    let user_id = params.user_id.trim();
    if user_id.is_empty() {
        return Err(ApiError::bad_request("userId is required"));
    }

    let version = state
        .store
        .latest_permission_version(application_key)
        .api_err("Failed to read permission version")?;
    let codes = state
        .store
        .enabled_codes_for_user(user_id, application_key)
        .api_err("Failed to resolve permissions")?;

    Ok(Json(PermissionSet {
        version: version.to_string(),
        codes,
    }))
}
