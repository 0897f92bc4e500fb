use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::RequireSession;
use crate::server::AppState;
use crate::server::dto::{
    CreateSchemaRequest, CreateVersionRequest, CurrentVersionResponse, ListSchemasParams,
    PublishVersionRequest, SchemaIdParams, SuccessResponse,
};
use crate::server::response::{ApiError, ListResponse, StoreOptionExt, StoreResultExt};
use crate::server::validation::validate_application_key;
use crate::types::LogicalSchema;

pub async fn create_schema(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSchemaRequest>,
) -> impl IntoResponse {
    let application_key = req.application_key.trim();
    validate_application_key(application_key)?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Schema name is required"));
    }

    let schema = LogicalSchema {
        id: Uuid::new_v4().to_string(),
        application_key: application_key.to_string(),
        name: name.to_string(),
        created_at: Utc::now(),
    };

    state
        .store
        .create_logical_schema(&schema)
        .api_err("Failed to create schema")?;

    Ok((StatusCode::CREATED, Json(schema)))
}

pub async fn list_schemas(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListSchemasParams>,
) -> impl IntoResponse {
    let filter = params
        .application_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty());

    let schemas = state
        .store
        .list_logical_schemas(filter)
        .api_err("Failed to list schemas")?;

    Ok::<_, ApiError>(Json(ListResponse::new(schemas)))
}

/// POST /schemas/versions - adds a draft numbered after the highest existing version.
pub async fn create_version(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateVersionRequest>,
) -> impl IntoResponse {
    if !req.definition.is_object() {
        return Err(ApiError::bad_request("definition must be a JSON object"));
    }

    state
        .store
        .get_logical_schema(&req.schema_id)
        .api_err("Failed to load schema")?
        .or_not_found("Schema not found")?;

    let version = state
        .store
        .create_schema_version(&req.schema_id, &req.definition)
        .map_err(ApiError::from)?;

    tracing::info!(
        "Created draft version {} of schema {}",
        version.number,
        req.schema_id
    );

    Ok((StatusCode::CREATED, Json(version)))
}

pub async fn list_versions(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
    Query(params): Query<SchemaIdParams>,
) -> impl IntoResponse {
    let versions = state
        .store
        .list_schema_versions(&params.schema_id)
        .api_err("Failed to list schema versions")?;

    Ok::<_, ApiError>(Json(ListResponse::new(versions)))
}

/// POST /schemas/publish - publishes one version and archives the previous one.
pub async fn publish_version(
    session: RequireSession,
    State(state): State<Arc<AppState>>,
    Json(req): Json<PublishVersionRequest>,
) -> impl IntoResponse {
    state
        .store
        .publish_schema_version(&req.version_id)
        .map_err(|e| match e {
            crate::error::Error::NotFound => ApiError::not_found("Schema version not found"),
            other => ApiError::from(other),
        })?;

    tracing::info!(
        "Published schema version {} ({})",
        req.version_id,
        session.operator.name
    );

    Ok::<_, ApiError>(Json(SuccessResponse { is_success: true }))
}

pub async fn current_version(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
    Query(params): Query<SchemaIdParams>,
) -> impl IntoResponse {
    let current = state
        .store
        .current_schema_version(&params.schema_id)
        .api_err("Failed to load current schema version")?;

    Ok::<_, ApiError>(Json(CurrentVersionResponse { current }))
}
