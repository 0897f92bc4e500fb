use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};

use crate::registry::schema_name_for;
use crate::server::AppState;
use crate::server::dto::EnvParams;
use crate::server::response::{ApiError, ApiResponse, StoreResultExt};

/// GET /env - database variables for an application's env file.
///
/// A registered schema name takes precedence over the requested one.
pub async fn database_env(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EnvParams>,
) -> impl IntoResponse {
    let app_id = params.app_id.trim();
    if app_id.is_empty() {
        return Err(ApiError::bad_request("appId is required"));
    }

    let registered = state
        .store
        .get_registry_entry(app_id)
        .api_err("Failed to load schema registry")?;

    let schema_name = match registered {
        Some(entry) => entry.schema_name,
        None => {
            let requested = params.schema_name.as_deref().map(str::trim).unwrap_or("");
            if requested.is_empty() {
                schema_name_for(app_id, "")
            } else {
                schema_name_for(requested, "")
            }
        }
    };

    let mut vars = BTreeMap::new();
    vars.insert(
        "DATABASE_URL".to_string(),
        state.provisioner.connection_url(&schema_name),
    );
    vars.insert("SCHEMA_NAME".to_string(), schema_name);

    Ok(Json(ApiResponse::success(vars)))
}
