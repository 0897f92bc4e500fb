use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};

use crate::auth::RequireSession;
use crate::registry::{self, SyncRequest};
use crate::server::AppState;
use crate::server::dto::SyncResponse;
use crate::server::response::{ApiError, ListResponse, StoreResultExt};
use crate::server::validation::validate_schema_name;

/// POST /schemas/sync - provision the schema and apply pending migrations.
///
/// Provisioning failures come back as `status: "failed"` with a 200. A sync
/// already running for the same application yields 409.
pub async fn sync_schema(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SyncRequest>,
) -> impl IntoResponse {
    if !req.schema_name.trim().is_empty() {
        validate_schema_name(req.schema_name.trim())?;
    }

    let report = registry::sync_schema(
        state.store.as_ref(),
        state.provisioner.as_ref(),
        &req,
        state.config.migration_lease_secs,
    )
    .map_err(ApiError::from)?;

    Ok::<_, ApiError>(Json(SyncResponse {
        success: true,
        data: report,
    }))
}

pub async fn list_registry(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let entries = state
        .store
        .list_registry_entries()
        .api_err("Failed to list schema registry")?;

    Ok::<_, ApiError>(Json(ListResponse::new(entries)))
}

pub async fn list_history(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
) -> impl IntoResponse {
    let history = state
        .store
        .list_migration_history(&app_id)
        .api_err("Failed to list migration history")?;

    Ok::<_, ApiError>(Json(ListResponse::new(history)))
}
